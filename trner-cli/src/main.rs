//! Linha de comando do NER turco: treino, avaliação, marcação e pré-análise.

use std::collections::HashSet;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use trner_core::corpus::{all_tokens, load_corpus, LabelPolicy, LabeledSentence};
use trner_core::crf::{CrfModel, DEFAULT_TOP_N};
use trner_core::preprocess::Preprocessor;
use trner_core::{NerConfig, NerPipeline};

#[derive(Parser, Debug)]
#[command(name = "trner", version, about = "NER turco com CRF linear-chain")]
struct Cli {
    /// Arquivo JSON de configuração. Sem ele, valores padrão.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Treina um modelo a partir de um corpus anotado
    Train {
        /// Corpus de treino (.conll ou .json)
        #[arg(long)]
        corpus: PathBuf,
        /// Onde salvar o modelo
        #[arg(long)]
        model: PathBuf,
        /// Exporta os maiores pesos em JSON
        #[arg(long)]
        weights: Option<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_TOP_N)]
        top_n: usize,
        /// Labels fora do conjunto fechado viram O em vez de erro
        #[arg(long)]
        scrub_labels: bool,
    },
    /// Avalia um modelo salvo (F1 ponderada sem O)
    Evaluate {
        #[arg(long)]
        corpus: PathBuf,
        #[arg(long)]
        model: PathBuf,
        #[arg(long)]
        scrub_labels: bool,
    },
    /// Marca texto bruto; sem TEXT, lê uma sentença por linha da entrada padrão
    Tag {
        #[arg(long)]
        model: PathBuf,
        /// Saída em JSON (uma linha por sentença)
        #[arg(long)]
        json: bool,
        text: Vec<String>,
    },
    /// Analisa morfologicamente todos os tokens distintos de um corpus
    PreAnalyze {
        #[arg(long)]
        corpus: PathBuf,
        #[arg(long)]
        scrub_labels: bool,
    },
}

fn policy(scrub: bool) -> LabelPolicy {
    if scrub {
        LabelPolicy::Scrub
    } else {
        LabelPolicy::Strict
    }
}

fn read_corpus(path: &Path, scrub: bool) -> Result<Vec<LabeledSentence>> {
    load_corpus(path, policy(scrub))
        .with_context(|| format!("falha ao ler o corpus {}", path.display()))
}

fn load_pipeline(config: &NerConfig, model: &Path) -> Result<NerPipeline> {
    let model = CrfModel::load(model).context("falha ao carregar o modelo")?;
    Ok(NerPipeline::from_config(config)?.with_model(model))
}

fn tag_line(pipeline: &NerPipeline, text: &str, json: bool) -> Result<()> {
    let output = pipeline.analyze(text);
    if json {
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }
    let line: Vec<String> = output
        .tagged_tokens
        .iter()
        .map(|t| format!("{}/{}", t.token.text, t.label))
        .collect();
    println!("{}", line.join(" "));
    for entity in &output.entities {
        println!("  {} [{}]", entity.text, entity.entity_type.name());
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => NerConfig::from_file(path)
            .with_context(|| format!("configuração inválida em {}", path.display()))?,
        None => NerConfig::default(),
    };

    match cli.command {
        Command::Train {
            corpus,
            model,
            weights,
            top_n,
            scrub_labels,
        } => {
            let sentences = read_corpus(&corpus, scrub_labels)?;
            let mut pipeline = NerPipeline::from_config(&config)?;
            let summary = pipeline.train(&sentences)?;
            pipeline.model().save(&model)?;
            if let Some(weights) = weights {
                pipeline.model().save_weights(&weights, top_n)?;
            }
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Evaluate {
            corpus,
            model,
            scrub_labels,
        } => {
            let sentences = read_corpus(&corpus, scrub_labels)?;
            let pipeline = load_pipeline(&config, &model)?;
            let (f1, report) = pipeline.evaluate(&sentences)?;
            println!("{report}");
            info!("F1 ponderada: {f1:.4}");
        }
        Command::Tag { model, json, text } => {
            let pipeline = load_pipeline(&config, &model)?;
            if text.is_empty() {
                for line in io::stdin().lock().lines() {
                    let line = line?;
                    if !line.trim().is_empty() {
                        tag_line(&pipeline, &line, json)?;
                    }
                }
            } else {
                tag_line(&pipeline, &text.join(" "), json)?;
            }
        }
        Command::PreAnalyze {
            corpus,
            scrub_labels,
        } => {
            let sentences = read_corpus(&corpus, scrub_labels)?;
            let tokens = all_tokens(&sentences);
            let mut seen = HashSet::new();
            let mut unique: Vec<String> = Vec::new();
            for token in &tokens {
                if seen.insert(token.as_str()) {
                    unique.push(token.clone());
                }
            }
            info!(
                "pré-analisando {} tokens ({} distintos) com o motor {:?}",
                tokens.len(),
                unique.len(),
                config.engine
            );

            let preprocessor = Preprocessor::from_config(&config);
            preprocessor.warm_up(&unique);
            for token in preprocessor.process_sentence(&unique) {
                println!("{}", serde_json::to_string(&token)?);
            }
        }
    }

    Ok(())
}
