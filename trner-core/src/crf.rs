//! # CRF: Conditional Random Field Linear-Chain
//!
//! Modelo probabilístico que aprende `P(y|x)`, onde `y` é a sequência de
//! labels e `x` a sequência de [`FeatureSet`]s.
//!
//! ## Estrutura do Modelo
//!
//! Score total de uma sequência de labels:
//!
//! ```text
//! score(y, x) = Σ_i [state(y_i, x_i) + transition(y_{i-1}, y_i)]
//! state(y, x_i) = Σ_a w[a, y] · valor_a(x_i)
//! P(y|x) = exp(score(y, x)) / Z(x)
//! ```
//!
//! Cada feature do [`FeatureSet`] vira um atributo numérico
//! ([`FeatureSet::attributes`]). Só existem pesos de estado para pares
//! (atributo, label) vistos juntos no treino; transições existem para todos
//! os pares de labels.
//!
//! ## Treino
//!
//! Minimiza a verossimilhança negativa regularizada
//!
//! ```text
//! L(w) = Σ_s [log Z(x_s) - score(y_s, x_s)] + c1·‖w‖₁ + c2·‖w‖²
//! ```
//!
//! com o L-BFGS do `liblbfgs` (OWL-QN quando `c1 > 0`). O gradiente de cada
//! sentença vem do forward-backward ([`crate::viterbi::ForwardBackward`]) e é
//! somado em paralelo com rayon.
//!
//! ## Predição
//!
//! Viterbi exato, sem restrição BIO: `I-X` depois de `O` é possível se os
//! pesos assim decidirem (ver [`crate::tagger::repair_bio`]).

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::CrfParams;
use crate::error::{NerError, Result};
use crate::features::FeatureSet;
use crate::metrics::{classification_report, ClassificationReport};
use crate::tagger::Label;
use crate::viterbi::{viterbi_decode, ForwardBackward};

/// Quantos pesos de cada tipo [`CrfModel::save_weights`] exporta.
pub const DEFAULT_TOP_N: usize = 100;

/// Sequência de atributos de uma sentença: `(id do atributo, valor)` por token.
type EncodedSequence = Vec<Vec<(usize, f64)>>;

/// Peso de estado exportado.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateWeight {
    /// `(atributo, label)`
    pub feature: (String, String),
    pub weight: f64,
}

/// Peso de transição exportado.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionWeight {
    pub from: String,
    pub to: String,
    pub weight: f64,
}

/// Formato do arquivo de [`CrfModel::save_weights`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightsExport {
    pub top_features: Vec<StateWeight>,
    pub top_transitions: Vec<TransitionWeight>,
}

/// Resumo de um treino.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub sentences: usize,
    pub tokens: usize,
    pub attributes: usize,
    pub state_features: usize,
    pub iterations: usize,
    pub objective: f64,
    pub converged: bool,
    /// Pesos de estado não-nulos ao final (o L1 zera os demais).
    pub active_features: usize,
}

/// Modelo CRF com pesos aprendidos.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrfModel {
    params: CrfParams,
    /// Labels vistas no treino, em ordem de [`Label::index`].
    labels: Vec<Label>,
    /// Nome do atributo → id.
    attributes: HashMap<String, usize>,
    /// Por atributo: `(índice da label, índice do peso)`.
    state_features: Vec<Vec<(usize, usize)>>,
    /// Pesos de estado seguidos da matriz de transição `L × L` (linha = anterior).
    weights: Vec<f64>,
}

impl CrfModel {
    /// Modelo vazio; prevê `O` para tudo até ser treinado.
    pub fn new(params: CrfParams) -> Self {
        Self {
            params,
            labels: Vec::new(),
            attributes: HashMap::new(),
            state_features: Vec::new(),
            weights: Vec::new(),
        }
    }

    /// Labels que o modelo conhece.
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn is_trained(&self) -> bool {
        !self.labels.is_empty()
    }

    fn n_state(&self) -> usize {
        self.weights.len() - self.labels.len() * self.labels.len()
    }

    /// Score de transição `from → to`, ou `None` se alguma label é desconhecida.
    pub fn transition_weight(&self, from: &Label, to: &Label) -> Option<f64> {
        let p = self.label_position(from)?;
        let y = self.label_position(to)?;
        Some(self.weights[self.n_state() + p * self.labels.len() + y])
    }

    /// Peso de estado do par (atributo, label), se a feature existe.
    pub fn state_weight(&self, attribute: &str, label: &Label) -> Option<f64> {
        let a = *self.attributes.get(attribute)?;
        let y = self.label_position(label)?;
        self.state_features[a]
            .iter()
            .find(|(l, _)| *l == y)
            .map(|(_, w)| self.weights[*w])
    }

    fn label_position(&self, label: &Label) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    /// Atributos conhecidos de uma sentença; os desconhecidos são ignorados.
    fn encode(&self, xseq: &[FeatureSet]) -> EncodedSequence {
        xseq.iter()
            .map(|fs| {
                fs.attributes()
                    .into_iter()
                    .filter_map(|(name, value)| self.attributes.get(&name).map(|&a| (a, value)))
                    .collect()
            })
            .collect()
    }

    fn transition_matrix(&self, weights: &[f64]) -> Vec<Vec<f64>> {
        let l = self.labels.len();
        let offset = weights.len() - l * l;
        (0..l)
            .map(|p| weights[offset + p * l..offset + (p + 1) * l].to_vec())
            .collect()
    }

    fn emission_scores(&self, weights: &[f64], encoded: &EncodedSequence) -> Vec<Vec<f64>> {
        encoded
            .iter()
            .map(|token| {
                let mut row = vec![0.0; self.labels.len()];
                for &(a, value) in token {
                    for &(y, w) in &self.state_features[a] {
                        row[y] += weights[w] * value;
                    }
                }
                row
            })
            .collect()
    }

    /// Treina o modelo do zero (pesos anteriores são descartados).
    pub fn train(&mut self, x: &[Vec<FeatureSet>], y: &[Vec<Label>]) -> Result<TrainingSummary> {
        self.params.validate()?;
        if x.is_empty() {
            return Err(NerError::EmptyTrainingData);
        }
        if x.len() != y.len() {
            return Err(NerError::LengthMismatch {
                what: "sentenças X vs y",
                left: x.len(),
                right: y.len(),
            });
        }
        for (xs, ys) in x.iter().zip(y) {
            if xs.len() != ys.len() {
                return Err(NerError::LengthMismatch {
                    what: "tokens vs labels",
                    left: xs.len(),
                    right: ys.len(),
                });
            }
        }
        let tokens: usize = y.iter().map(Vec::len).sum();
        if tokens == 0 {
            return Err(NerError::EmptyTrainingData);
        }

        // === Labels vistas ===
        let mut labels: Vec<Label> = Vec::new();
        for label in y.iter().flatten() {
            if !labels.contains(label) {
                labels.push(*label);
            }
        }
        labels.sort_by_key(Label::index);
        self.labels = labels;
        let n_labels = self.labels.len();

        // === Atributos e features de estado ===
        self.attributes.clear();
        self.state_features.clear();
        let mut n_state = 0usize;
        let mut data: Vec<(EncodedSequence, Vec<usize>)> = Vec::with_capacity(x.len());

        for (xs, ys) in x.iter().zip(y) {
            let gold: Vec<usize> = ys
                .iter()
                .filter_map(|l| self.label_position(l))
                .collect();
            let mut encoded: EncodedSequence = Vec::with_capacity(xs.len());
            for (fs, &label) in xs.iter().zip(&gold) {
                let mut token = Vec::new();
                for (name, value) in fs.attributes() {
                    let next_id = self.attributes.len();
                    let a = *self.attributes.entry(name).or_insert(next_id);
                    if a == self.state_features.len() {
                        self.state_features.push(Vec::new());
                    }
                    if !self.state_features[a].iter().any(|(l, _)| *l == label) {
                        self.state_features[a].push((label, n_state));
                        n_state += 1;
                    }
                    token.push((a, value));
                }
                encoded.push(token);
            }
            data.push((encoded, gold));
        }

        // Transições: todas, ou só as observadas no treino.
        let mut trainable = vec![self.params.all_possible_transitions; n_labels * n_labels];
        for (_, gold) in &data {
            for pair in gold.windows(2) {
                trainable[pair[0] * n_labels + pair[1]] = true;
            }
        }

        info!(
            "treinando CRF: {} sentenças, {} tokens, {} labels, {} atributos, {} features",
            data.len(),
            tokens,
            n_labels,
            self.attributes.len(),
            n_state
        );

        let c2 = self.params.c2;
        let n_weights = n_state + n_labels * n_labels;

        let mut lbfgs = liblbfgs::lbfgs()
            .with_max_iterations(self.params.max_iterations)
            .with_epsilon(self.params.epsilon);
        if self.params.c1 > 0.0 {
            // OWL-QN só aceita busca linear por backtracking
            lbfgs = lbfgs
                .with_linesearch_algorithm("BacktrackingStrongWolfe")
                .with_orthantwise(self.params.c1, 0, n_weights);
        }

        let model = &*self;
        let mut weights = vec![0.0; n_weights];
        let mut iterations = 0usize;
        let report = lbfgs
            .minimize(
                &mut weights,
                |w: &[f64], grad: &mut [f64]| {
                    let (loss, g) = data
                        .par_iter()
                        .fold(
                            || (0.0, vec![0.0; n_weights]),
                            |(loss, mut g), (encoded, gold)| {
                                let l = model.sentence_gradient(w, encoded, gold, &mut g);
                                (loss + l, g)
                            },
                        )
                        .reduce(
                            || (0.0, vec![0.0; n_weights]),
                            |(la, mut ga), (lb, gb)| {
                                ga.iter_mut().zip(&gb).for_each(|(a, b)| *a += b);
                                (la + lb, ga)
                            },
                        );

                    grad.copy_from_slice(&g);
                    for (i, gi) in grad.iter_mut().enumerate().skip(n_state) {
                        if !trainable[i - n_state] {
                            *gi = 0.0;
                        }
                    }
                    let mut total = loss;
                    for (gi, wi) in grad.iter_mut().zip(w) {
                        total += c2 * wi * wi;
                        *gi += 2.0 * c2 * wi;
                    }
                    Ok(total)
                },
                |progress| {
                    iterations = progress.niter;
                    debug!(
                        "iteração {}: objetivo {:.6}, |g| {:.6}",
                        progress.niter, progress.fx, progress.gnorm
                    );
                    false
                },
            )
            .map_err(|e| NerError::Optimizer(format!("{e:#}")))?;
        self.weights = weights;

        let active_features = self.weights[..n_state].iter().filter(|w| **w != 0.0).count();
        let summary = TrainingSummary {
            sentences: data.len(),
            tokens,
            attributes: self.attributes.len(),
            state_features: n_state,
            iterations,
            objective: report.fx,
            converged: report.gnorm / report.xnorm.max(1.0) <= self.params.epsilon,
            active_features,
        };
        info!(
            "treino concluído: {} iterações, objetivo {:.4}, {} features ativas",
            summary.iterations, summary.objective, summary.active_features
        );
        Ok(summary)
    }

    /// Acumula em `grad` o gradiente da NLL de uma sentença e devolve a NLL.
    fn sentence_gradient(
        &self,
        weights: &[f64],
        encoded: &EncodedSequence,
        gold: &[usize],
        grad: &mut [f64],
    ) -> f64 {
        let n_labels = self.labels.len();
        let offset = weights.len() - n_labels * n_labels;
        let emission = self.emission_scores(weights, encoded);
        let transition = self.transition_matrix(weights);
        let fb = ForwardBackward::compute(&emission, &transition);
        let marginals = fb.marginals();

        let mut gold_score = 0.0;
        for (i, &y) in gold.iter().enumerate() {
            gold_score += emission[i][y];
            if i > 0 {
                gold_score += transition[gold[i - 1]][y];
            }
        }

        // Estado: esperado - observado
        for (i, token) in encoded.iter().enumerate() {
            for &(a, value) in token {
                for &(y, w) in &self.state_features[a] {
                    let observed = if y == gold[i] { 1.0 } else { 0.0 };
                    grad[w] += value * (marginals[i][y] - observed);
                }
            }
        }

        // Transições
        for i in 1..encoded.len() {
            for p in 0..n_labels {
                for y in 0..n_labels {
                    grad[offset + p * n_labels + y] +=
                        fb.pair_marginal(&emission, &transition, i, p, y);
                }
            }
            grad[offset + gold[i - 1] * n_labels + gold[i]] -= 1.0;
        }

        fb.log_z - gold_score
    }

    /// Sequência de labels mais provável para uma sentença.
    pub fn predict_single(&self, xseq: &[FeatureSet]) -> Vec<Label> {
        if !self.is_trained() {
            return vec![Label::Outside; xseq.len()];
        }
        let emission = self.emission_scores(&self.weights, &self.encode(xseq));
        let transition = self.transition_matrix(&self.weights);
        viterbi_decode(&emission, &transition)
            .best_path
            .into_iter()
            .map(|y| self.labels[y])
            .collect()
    }

    pub fn predict(&self, x: &[Vec<FeatureSet>]) -> Vec<Vec<Label>> {
        x.iter().map(|xseq| self.predict_single(xseq)).collect()
    }

    /// `P(y_i = label | x)` para cada token e cada label conhecida.
    pub fn predict_marginals(&self, xseq: &[FeatureSet]) -> Vec<HashMap<Label, f64>> {
        if !self.is_trained() {
            return xseq
                .iter()
                .map(|_| HashMap::from([(Label::Outside, 1.0)]))
                .collect();
        }
        let emission = self.emission_scores(&self.weights, &self.encode(xseq));
        let transition = self.transition_matrix(&self.weights);
        ForwardBackward::compute(&emission, &transition)
            .marginals()
            .into_iter()
            .map(|row| self.labels.iter().copied().zip(row).collect())
            .collect()
    }

    /// Prediz `x` e compara com `y_true`, sem contar `O`.
    ///
    /// Retorna a F1 ponderada e o relatório por label.
    pub fn evaluate(
        &self,
        x: &[Vec<FeatureSet>],
        y_true: &[Vec<Label>],
    ) -> Result<(f64, ClassificationReport)> {
        if x.len() != y_true.len() {
            return Err(NerError::LengthMismatch {
                what: "sentenças X vs y",
                left: x.len(),
                right: y_true.len(),
            });
        }
        let y_pred = self.predict(x);

        let mut labels: Vec<Label> = self.labels.clone();
        for label in y_true.iter().flatten() {
            if !labels.contains(label) {
                labels.push(*label);
            }
        }
        labels.retain(|l| *l != Label::Outside);
        labels.sort_by_key(Label::index);

        let report = classification_report(y_true, &y_pred, &labels)?;
        debug!("avaliação: F1 ponderada = {:.4}", report.weighted_f1);
        Ok((report.weighted_f1, report))
    }

    /// As `n` features de estado de maior |peso|.
    pub fn top_features(&self, n: usize) -> Vec<StateWeight> {
        let mut names: Vec<&str> = vec![""; self.attributes.len()];
        for (name, &a) in &self.attributes {
            names[a] = name.as_str();
        }

        let mut all: Vec<StateWeight> = self
            .state_features
            .iter()
            .enumerate()
            .flat_map(|(a, feats)| {
                let name = names[a];
                feats.iter().map(move |&(y, w)| (name, y, w))
            })
            .map(|(name, y, w)| StateWeight {
                feature: (name.to_string(), self.labels[y].to_string()),
                weight: self.weights[w],
            })
            .collect();
        sort_by_magnitude(&mut all, |s| s.weight);
        all.truncate(n);
        all
    }

    /// As `n` transições de maior |peso|.
    pub fn top_transitions(&self, n: usize) -> Vec<TransitionWeight> {
        let transition = self.transition_matrix(&self.weights);
        let mut all: Vec<TransitionWeight> = transition
            .iter()
            .enumerate()
            .flat_map(|(p, row)| {
                row.iter().enumerate().map(move |(y, &weight)| (p, y, weight))
            })
            .map(|(p, y, weight)| TransitionWeight {
                from: self.labels[p].to_string(),
                to: self.labels[y].to_string(),
                weight,
            })
            .collect();
        sort_by_magnitude(&mut all, |t| t.weight);
        all.truncate(n);
        all
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        write_json(path, self)?;
        info!("modelo salvo em {}", path.display());
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(NerError::ModelNotFound(path.to_path_buf()));
        }
        let raw = fs::read_to_string(path).map_err(|e| NerError::io(path, e))?;
        let model: CrfModel = serde_json::from_str(&raw)?;
        info!("modelo carregado de {}", path.display());
        Ok(model)
    }

    /// Exporta as `top_n` maiores features de estado e transições em JSON.
    pub fn save_weights(&self, path: impl AsRef<Path>, top_n: usize) -> Result<()> {
        let path = path.as_ref();
        let export = WeightsExport {
            top_features: self.top_features(top_n),
            top_transitions: self.top_transitions(top_n),
        };
        write_json(path, &export)?;
        info!("pesos salvos em {}", path.display());
        Ok(())
    }
}

fn sort_by_magnitude<T>(items: &mut [T], weight: impl Fn(&T) -> f64) {
    items.sort_by(|a, b| {
        weight(b)
            .abs()
            .partial_cmp(&weight(a).abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| NerError::io(parent, e))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).map_err(|e| NerError::io(path, e))
}
