use std::fs;

use entail_core::{
    CorpusReader, DecomposableAttention, Label, Mode, ModelConfig, NULL_INDEX, Session,
    WordEmbeddingTable, encoder,
};

#[test]
fn test_files_to_logits() {
    let dir = tempfile::tempdir().unwrap();
    let vectors = dir.path().join("vectors.txt");
    fs::write(&vectors, "3 2\nthe 0.1 0.1\ncat 0.5 -0.2\nsat -0.3 0.7\n").unwrap();
    let train = dir.path().join("train.jsonl");
    fs::write(
        &train,
        concat!(
            r#"{"sentence1":"The cat sat.","sentence2":"A cat sat.","gold_label":"entailment"}"#,
            "\n",
            r#"{"sentence1": "The cat.", "sentence2": "The dog sat.", "gold_label": "-"}"#,
            "\n",
        ),
    )
    .unwrap();
    let valid = dir.path().join("dev.tsv");
    fs::write(&valid, "The cat\tthe cat sat on the mat\tneutral\n").unwrap();

    let mut session = Session::new(7);
    let reader = CorpusReader::new().unwrap();
    let train_pairs = reader.read(&train).unwrap();
    let valid_pairs = reader.read(&valid).unwrap();
    assert_eq!(train_pairs.len(), 1);
    assert_eq!(valid_pairs[0].label, Label::Neutral);

    let table = WordEmbeddingTable::load_text(&vectors, &mut session).unwrap();
    assert_eq!(table.shape(), (4, 2));

    let dims = encoder::max_size(&[&train_pairs, &valid_pairs]);
    // "the cat sat on the mat" is the longest hypothesis.
    assert_eq!(dims.hypothesis, 7);
    assert_eq!(dims.premise, 5);

    let train_set = encoder::encode(&train_pairs, &table, dims).unwrap();
    let valid_set = encoder::encode(&valid_pairs, &table, dims).unwrap();
    assert_eq!(train_set.shape1(), (1, 5));
    assert_eq!(valid_set.shape2(), (1, 7));
    // "a" and "." are not in the vocabulary.
    assert_eq!(train_set.hypothesis(0)[0], NULL_INDEX);
    assert_eq!(train_set.lengths2(), &[4]);

    let config = ModelConfig::new(5, dims, true);
    let model = DecomposableAttention::new(config, &table, &mut session).unwrap();
    let batch = valid_set.batch(&[0], session.device()).unwrap();
    let logits = model.forward(&batch, Mode::Eval).unwrap();
    assert_eq!(logits.dims(), &[1, Label::NUM_CLASSES]);
}

#[test]
fn test_same_seed_same_model() {
    let words = vec!["a".to_string(), "b".to_string()];
    let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
    let pairs = vec![entail_core::SentencePair::new(
        vec!["a".into(), "b".into()],
        vec!["b".into()],
        Label::Contradiction,
    )];
    let dims = encoder::max_size(&[&pairs]);

    let logits = |seed: u64| {
        let mut session = Session::new(seed);
        let table =
            WordEmbeddingTable::from_vectors(words.clone(), vectors.clone(), &mut session)
                .unwrap();
        let data = encoder::encode(&pairs, &table, dims).unwrap();
        let config = ModelConfig::new(3, dims, false);
        let model = DecomposableAttention::new(config, &table, &mut session).unwrap();
        let batch = data.batch(&[0], session.device()).unwrap();
        model
            .forward(&batch, Mode::Eval)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap()
    };

    assert_eq!(logits(11), logits(11));
    assert_ne!(logits(11), logits(12));
}
