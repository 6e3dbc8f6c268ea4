//! Cenários de ponta a ponta: configuração em disco → pipeline → modelo.

use std::fs;
use std::path::Path;

use trner_core::config::CrfParams;
use trner_core::corpus::{load_corpus, LabelPolicy, LabeledSentence};
use trner_core::crf::CrfModel;
use trner_core::metrics::classification_report;
use trner_core::{EntityType, Label, NerConfig, NerPipeline};

fn words(text: &str) -> Vec<String> {
    text.split_whitespace().map(String::from).collect()
}

fn config_with_gazetteers(dir: &Path) -> NerConfig {
    let gazetteers = dir.join("gazetteers");
    fs::create_dir_all(&gazetteers).unwrap();
    fs::write(gazetteers.join("kisiler.txt"), "Tarkan\nSezen\n").unwrap();
    fs::write(gazetteers.join("yerler.txt"), "İstanbul\nAnkara\n").unwrap();

    NerConfig {
        gazetteer_dir: gazetteers,
        crf: CrfParams {
            c1: 0.0,
            c2: 0.01,
            max_iterations: 50,
            ..CrfParams::default()
        },
        ..NerConfig::default()
    }
}

fn training_corpus(dir: &Path) -> Vec<LabeledSentence> {
    let path = dir.join("train.conll");
    fs::write(
        &path,
        "Tarkan B-PER\nsahneye O\nçıktı O\n\nDün O\nSezen B-PER\ngeldi O\n",
    )
    .unwrap();
    load_corpus(&path, LabelPolicy::Strict).unwrap()
}

#[test]
fn gazetteer_membership_only_on_listed_token() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = NerPipeline::from_config(&config_with_gazetteers(dir.path())).unwrap();

    let features = pipeline.featurize(&words("Tarkan sahneye çıktı"));
    assert_eq!(features.len(), 3);
    assert!(features[0].is_true("in_kisiler_tokens"));
    assert!(!features[1].is_true("in_kisiler_tokens"));
    assert!(!features[2].is_true("in_kisiler_tokens"));
}

#[test]
fn every_token_gets_features() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = NerPipeline::from_config(&config_with_gazetteers(dir.path())).unwrap();

    let features = pipeline.featurize(&words("Dün Ankara'da yağmur yağdı"));
    assert_eq!(features.len(), 4);
    assert!(features.iter().all(|f| f.contains("bias")));

    let single = pipeline.featurize(&words("Tarkan"));
    assert!(single[0].is_true("BOS"));
    assert!(single[0].is_true("EOS"));
}

#[test]
fn trained_model_recognizes_unseen_sentence() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = NerPipeline::from_config(&config_with_gazetteers(dir.path())).unwrap();
    let summary = pipeline.train(&training_corpus(dir.path())).unwrap();
    assert_eq!(summary.sentences, 2);
    assert_eq!(summary.tokens, 6);

    let tokens = words("Tarkan şarkı söyledi");
    let labels = pipeline.label_tokens(&tokens);
    assert_eq!(labels.len(), 3);
    assert_eq!(labels[0], Label::Begin(EntityType::Per));

    let marginals = pipeline.model().predict_marginals(&pipeline.featurize(&tokens));
    let first = &marginals[0];
    assert!(first[&Label::Begin(EntityType::Per)] > first[&Label::Outside]);
    for row in &marginals {
        let total: f64 = row.values().sum();
        assert!((total - 1.0).abs() < 1e-6);
    }
}

#[test]
fn perfect_predictions_score_one() {
    let per = Label::Begin(EntityType::Per);
    let gold = vec![
        vec![per, Label::Outside, Label::Outside],
        vec![Label::Outside, per, Label::Outside],
    ];
    let report = classification_report(&gold, &gold, &[per]).unwrap();
    assert!((report.weighted_f1 - 1.0).abs() < 1e-12);

    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = NerPipeline::from_config(&config_with_gazetteers(dir.path())).unwrap();
    let corpus = training_corpus(dir.path());
    pipeline.train(&corpus).unwrap();
    let (f1, _) = pipeline.evaluate(&corpus).unwrap();
    assert!((f1 - 1.0).abs() < 1e-12);
}

#[test]
fn saved_model_predicts_the_same() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_gazetteers(dir.path());
    let mut pipeline = NerPipeline::from_config(&config).unwrap();
    pipeline.train(&training_corpus(dir.path())).unwrap();

    let model_path = dir.path().join("modelos").join("crf.json");
    pipeline.model().save(&model_path).unwrap();
    let artifact: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&model_path).unwrap()).unwrap();
    assert_eq!(artifact["labels"], serde_json::json!(["O", "B-PER"]));
    let reloaded = NerPipeline::from_config(&config)
        .unwrap()
        .with_model(CrfModel::load(&model_path).unwrap());

    let tokens = words("Sezen şarkı söyledi");
    assert_eq!(
        pipeline.label_tokens(&tokens),
        reloaded.label_tokens(&tokens)
    );

    let weights = dir.path().join("pesos.json");
    pipeline.model().save_weights(&weights, 5).unwrap();
    let export: serde_json::Value = serde_json::from_str(&fs::read_to_string(&weights).unwrap()).unwrap();
    assert!(export["top_features"].as_array().unwrap().len() <= 5);
}

#[test]
fn analyze_reports_entity_spans() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = NerPipeline::from_config(&config_with_gazetteers(dir.path())).unwrap();
    pipeline.train(&training_corpus(dir.path())).unwrap();

    let out = pipeline.analyze("Dün Tarkan geldi.");
    assert_eq!(out.tagged_tokens.len(), 4);
    assert!(out
        .entities
        .iter()
        .any(|e| e.text == "Tarkan" && e.entity_type == EntityType::Per));
}
