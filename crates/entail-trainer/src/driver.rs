//! End-to-end training run: read corpora, load embeddings, encode, train.

use anyhow::{Context, Result};
use entail_core::{
    CorpusReader, DecomposableAttention, ModelConfig, Session, WordEmbeddingTable, encoder,
};
use tracing::{debug, info};

use crate::checkpoint::ModelParams;
use crate::config::{HyperParams, TrainArgs};
use crate::trainer::{TrainReport, Trainer};

/// Execute a full training run described by `args`.
pub fn run(args: &TrainArgs) -> Result<TrainReport> {
    let params = HyperParams::try_from(args)?;
    let mut session = Session::new(params.seed);

    let reader = CorpusReader::new()?;
    info!("Reading training data from {}", args.train.display());
    let train_pairs = reader
        .read(&args.train)
        .with_context(|| format!("reading training data {}", args.train.display()))?;
    info!("Reading validation data from {}", args.validation.display());
    let valid_pairs = reader
        .read(&args.validation)
        .with_context(|| format!("reading validation data {}", args.validation.display()))?;

    info!("Loading embeddings from {}", args.embeddings.display());
    let table = WordEmbeddingTable::load_text(&args.embeddings, &mut session)
        .with_context(|| format!("loading embeddings {}", args.embeddings.display()))?;
    let dict_path = table.write_word_dict(&args.save)?;
    debug!(
        "Embeddings {:?}, vocabulary written to {}",
        table.shape(),
        dict_path.display()
    );

    let dims = encoder::max_size(&[&train_pairs, &valid_pairs]);
    let train_set = encoder::encode(&train_pairs, &table, dims)?;
    let valid_set = encoder::encode(&valid_pairs, &table, dims)?;
    debug!(
        "Training sentences {:?} / {:?}, validation sentences {:?} / {:?}",
        train_set.shape1(),
        train_set.shape2(),
        valid_set.shape1(),
        valid_set.shape2()
    );

    let config = ModelConfig::new(params.num_units, dims, params.use_intra_attention);
    let model = DecomposableAttention::new(config.clone(), &table, &mut session)?;
    let metadata = ModelParams {
        model: config,
        embedding_shape: table.shape(),
        hyper: params.clone(),
    };
    let mut trainer = Trainer::new(model, params.optim())?.with_params(metadata);

    info!("Starting training");
    trainer.train(
        &mut session,
        &train_set,
        &valid_set,
        &params.train_options(&args.save, &args.logs),
    )
}
