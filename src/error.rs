use thiserror::Error;

/// Failure to acquire a model and tokenizer for one identifier.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("hub client unavailable: {0}")]
    Hub(String),

    #[error("failed to fetch {file} for {model_id}: {message}")]
    Fetch {
        model_id: String,
        file: String,
        message: String,
    },

    #[error("invalid model config for {model_id}: {message}")]
    Config { model_id: String, message: String },

    #[error("failed to load tokenizer for {model_id}: {message}")]
    Tokenizer { model_id: String, message: String },

    #[error("failed to load weights for {model_id}: {message}")]
    Weights { model_id: String, message: String },

    #[error("no model identifiers configured")]
    NoCandidates,
}

/// Failure while turning a prompt into paraphrases.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("tokenization failed: {0}")]
    Tokenization(String),

    #[error("tensor operation failed: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("decoding output failed: {0}")]
    Detokenization(String),

    #[error("model produced an empty paraphrase")]
    EmptyOutput,

    #[error("generation worker failed: {0}")]
    Worker(String),
}

/// A request field outside its configured bounds.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("malformed request body: {0}")]
    MalformedBody(String),

    #[error("text must not be empty")]
    EmptyText,

    #[error("text is {actual} characters long, the limit is {max}")]
    TextTooLong { actual: usize, max: usize },

    #[error("max_length must be between {min} and {max}, got {actual}")]
    MaxLengthOutOfRange { actual: usize, min: usize, max: usize },

    #[error("num_return_sequences must be between 1 and {max}, got {actual}")]
    SequencesOutOfRange { actual: usize, max: usize },

    #[error("batch of {actual} requests exceeds the limit of {max}")]
    BatchTooLarge { actual: usize, max: usize },

    #[error("item {index}: {source}")]
    BatchItem {
        index: usize,
        #[source]
        source: Box<ValidationError>,
    },
}

#[derive(Debug, Error)]
#[error("invalid lifecycle transition from {from} to {to}")]
pub struct LifecycleError {
    pub from: &'static str,
    pub to: &'static str,
}
