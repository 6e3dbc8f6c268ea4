//! # Inferência na Cadeia Linear: Viterbi e Forward-Backward
//!
//! As duas rotinas trabalham sobre a mesma treliça:
//!
//! - `emission[i][y]`: score de estado da label `y` no token `i`
//! - `transition[p][y]`: score de ir da label `p` para `y`
//!
//! ## Viterbi
//!
//! Programação dinâmica que encontra a sequência de maior score em `O(N × L²)`
//! em vez de `O(L^N)`:
//!
//! ```text
//! Inicialização: δ[0][y] = emission[0][y]
//! Recursão:      δ[i][y] = max_p (δ[i-1][p] + transition[p][y]) + emission[i][y]
//! Backtracking:  reconstrói o caminho ótimo de trás pra frente
//! ```
//!
//! A decodificação é exata: nenhuma transição é penalizada ou proibida aqui.
//!
//! ## Forward-Backward
//!
//! Mesma recursão trocando `max` por `log Σ exp`. Dá `log Z(x)` e as
//! marginais `P(y_i = y | x)` usadas no gradiente do treino e em
//! `predict_marginals`. Tudo em espaço logarítmico.

/// Resultado do Viterbi: índices de label por token.
#[derive(Debug, Clone, PartialEq)]
pub struct ViterbiResult {
    pub best_path: Vec<usize>,
    /// Score não-normalizado do melhor caminho.
    pub best_score: f64,
}

/// Executa o Viterbi. Sequência vazia gera caminho vazio.
pub fn viterbi_decode(emission: &[Vec<f64>], transition: &[Vec<f64>]) -> ViterbiResult {
    let Some(first) = emission.first() else {
        return ViterbiResult {
            best_path: vec![],
            best_score: 0.0,
        };
    };
    let n_tokens = emission.len();
    let n_labels = first.len();

    let mut delta: Vec<f64> = first.clone();
    // backptr[i][y] = label anterior que maximiza o score de y no token i
    let mut backptr: Vec<Vec<usize>> = vec![vec![0usize; n_labels]; n_tokens];

    for i in 1..n_tokens {
        let mut next = vec![f64::NEG_INFINITY; n_labels];
        for y in 0..n_labels {
            let (best_prev, best_score) = best_in_slice(
                &(0..n_labels)
                    .map(|p| delta[p] + transition[p][y])
                    .collect::<Vec<_>>(),
            );
            next[y] = best_score + emission[i][y];
            backptr[i][y] = best_prev;
        }
        delta = next;
    }

    let (mut best_last, best_score) = best_in_slice(&delta);
    let mut best_path = vec![0usize; n_tokens];
    best_path[n_tokens - 1] = best_last;
    for i in (0..n_tokens - 1).rev() {
        best_last = backptr[i + 1][best_last];
        best_path[i] = best_last;
    }

    ViterbiResult {
        best_path,
        best_score,
    }
}

/// Retorna (índice, valor) do máximo em um slice
fn best_in_slice(scores: &[f64]) -> (usize, f64) {
    scores
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, &v)| (i, v))
        .unwrap_or((0, f64::NEG_INFINITY))
}

/// `log Σ exp(x)` estável.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Tabelas α e β (em log) de uma sequência.
#[derive(Debug, Clone)]
pub struct ForwardBackward {
    pub alpha: Vec<Vec<f64>>,
    pub beta: Vec<Vec<f64>>,
    pub log_z: f64,
}

impl ForwardBackward {
    pub fn compute(emission: &[Vec<f64>], transition: &[Vec<f64>]) -> Self {
        let n_tokens = emission.len();
        let n_labels = emission.first().map(Vec::len).unwrap_or(0);
        if n_tokens == 0 {
            return Self {
                alpha: vec![],
                beta: vec![],
                log_z: 0.0,
            };
        }

        let mut alpha = vec![vec![0.0; n_labels]; n_tokens];
        alpha[0] = emission[0].clone();
        let mut terms = vec![0.0; n_labels];
        for i in 1..n_tokens {
            for y in 0..n_labels {
                for p in 0..n_labels {
                    terms[p] = alpha[i - 1][p] + transition[p][y];
                }
                alpha[i][y] = log_sum_exp(&terms) + emission[i][y];
            }
        }

        let mut beta = vec![vec![0.0; n_labels]; n_tokens];
        for i in (0..n_tokens - 1).rev() {
            for p in 0..n_labels {
                for y in 0..n_labels {
                    terms[y] = transition[p][y] + emission[i + 1][y] + beta[i + 1][y];
                }
                beta[i][p] = log_sum_exp(&terms);
            }
        }

        let log_z = log_sum_exp(&alpha[n_tokens - 1]);
        Self { alpha, beta, log_z }
    }

    /// `P(y_i = y | x)` para todo token e label.
    pub fn marginals(&self) -> Vec<Vec<f64>> {
        self.alpha
            .iter()
            .zip(&self.beta)
            .map(|(a, b)| {
                a.iter()
                    .zip(b)
                    .map(|(x, y)| (x + y - self.log_z).exp())
                    .collect()
            })
            .collect()
    }

    /// `P(y_{i-1} = p, y_i = y | x)`, com `i ≥ 1`.
    pub fn pair_marginal(
        &self,
        emission: &[Vec<f64>],
        transition: &[Vec<f64>],
        i: usize,
        p: usize,
        y: usize,
    ) -> f64 {
        (self.alpha[i - 1][p] + transition[p][y] + emission[i][y] + self.beta[i][y] - self.log_z)
            .exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Enumera todos os caminhos de uma treliça pequena.
    fn brute_force(emission: &[Vec<f64>], transition: &[Vec<f64>]) -> Vec<(Vec<usize>, f64)> {
        let n_labels = emission[0].len();
        let mut paths: Vec<Vec<usize>> = vec![vec![]];
        for _ in 0..emission.len() {
            paths = paths
                .into_iter()
                .flat_map(|p| {
                    (0..n_labels).map(move |y| {
                        let mut q = p.clone();
                        q.push(y);
                        q
                    })
                })
                .collect();
        }
        paths
            .into_iter()
            .map(|path| {
                let mut score = emission[0][path[0]];
                for i in 1..path.len() {
                    score += transition[path[i - 1]][path[i]] + emission[i][path[i]];
                }
                (path, score)
            })
            .collect()
    }

    fn lattice() -> (Vec<Vec<f64>>, Vec<Vec<f64>>) {
        let emission = vec![
            vec![0.5, 2.0, -1.0],
            vec![1.0, 0.2, 0.3],
            vec![0.0, -0.5, 1.5],
        ];
        let transition = vec![
            vec![0.1, -2.0, 0.4],
            vec![-1.0, 0.0, 3.0],
            vec![0.2, 0.2, -0.3],
        ];
        (emission, transition)
    }

    #[test]
    fn test_viterbi_is_exact() {
        let (emission, transition) = lattice();
        let result = viterbi_decode(&emission, &transition);
        let (best_path, best_score) = brute_force(&emission, &transition)
            .into_iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
            .unwrap();
        assert_eq!(result.best_path, best_path);
        assert!((result.best_score - best_score).abs() < 1e-9);
    }

    #[test]
    fn test_viterbi_keeps_strong_transition() {
        // sem penalidade: a transição forte 1→2 domina
        let emission = vec![vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 0.1]];
        let transition = vec![vec![0.0; 3], vec![0.0, 0.0, 5.0], vec![0.0; 3]];
        assert_eq!(viterbi_decode(&emission, &transition).best_path, vec![1, 2]);
    }

    #[test]
    fn test_viterbi_empty() {
        let result = viterbi_decode(&[], &[]);
        assert!(result.best_path.is_empty());
    }

    #[test]
    fn test_forward_backward_matches_enumeration() {
        let (emission, transition) = lattice();
        let paths = brute_force(&emission, &transition);
        let scores: Vec<f64> = paths.iter().map(|(_, s)| *s).collect();
        let log_z = log_sum_exp(&scores);

        let fb = ForwardBackward::compute(&emission, &transition);
        assert!((fb.log_z - log_z).abs() < 1e-9);

        let marginals = fb.marginals();
        for (i, row) in marginals.iter().enumerate() {
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-9);
            for (y, m) in row.iter().enumerate() {
                let expected: f64 = paths
                    .iter()
                    .filter(|(p, _)| p[i] == y)
                    .map(|(_, s)| (s - log_z).exp())
                    .sum();
                assert!((m - expected).abs() < 1e-9);
            }
        }

        let pair = fb.pair_marginal(&emission, &transition, 1, 1, 2);
        let expected: f64 = paths
            .iter()
            .filter(|(p, _)| p[0] == 1 && p[1] == 2)
            .map(|(_, s)| (s - log_z).exp())
            .sum();
        assert!((pair - expected).abs() < 1e-9);
    }

    #[test]
    fn test_log_sum_exp() {
        assert!((log_sum_exp(&[0.0, 0.0]) - 2f64.ln()).abs() < 1e-12);
        assert_eq!(log_sum_exp(&[]), f64::NEG_INFINITY);
        assert!((log_sum_exp(&[1000.0, 1000.0]) - (1000.0 + 2f64.ln())).abs() < 1e-9);
    }
}
