pub mod classifier;
pub mod config;
pub mod error;
pub mod message;
pub mod statfile;
pub mod tokenizer;

pub use classifier::{Classifier, ClassifierContext};
pub use config::{MetricConfig, StatConfig, StatfileConfig};
pub use error::{Result, StatError};
pub use message::MimePart;
pub use statfile::{BLOCK_SIZE, StatfilePool};
pub use tokenizer::{Token, TokenSet, Tokenizer};
