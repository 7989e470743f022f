use std::path::Path;

use sift_common::scratch::Scratch;

use crate::{
    error::{Result, StatError},
    statfile::{NEUTRAL_WEIGHT, StatfilePool},
    tokenizer::TokenSet,
};

pub const DEFAULT_CLASSIFIER: &str = "winnow";

const PROMOTION: f32 = 1.23;
const DEMOTION: f32 = 0.83;

/// Per-training state, taken from the session's scratch pool
#[derive(Debug, Default)]
pub struct ClassifierContext {
    trained: usize,
}

impl ClassifierContext {
    /// Tokens trained through this context so far
    pub const fn trained(&self) -> usize {
        self.trained
    }
}

pub trait Classifier: Send + Sync {
    fn name(&self) -> &'static str;

    fn init(&self, scratch: &mut Scratch) -> ClassifierContext {
        scratch.share(std::mem::size_of::<ClassifierContext>());
        ClassifierContext::default()
    }

    ///
    /// Train the statfile at `path` on `tokens`
    ///
    /// # Errors
    /// If the statfile is not open or cannot be written back
    ///
    fn learn(
        &self,
        context: &mut ClassifierContext,
        pool: &mut StatfilePool,
        path: &Path,
        tokens: &TokenSet,
        positive: bool,
    ) -> Result<()>;
}

/// Multiplicative weight update: every token seen in a positive example is
/// promoted, every token in a negative one demoted.
#[derive(Debug, Default)]
pub struct Winnow;

static WINNOW: Winnow = Winnow;

static CLASSIFIERS: [&'static dyn Classifier; 1] = [&WINNOW];

/// Look up a classifier by its configured name
pub fn get(name: &str) -> Option<&'static dyn Classifier> {
    CLASSIFIERS
        .iter()
        .copied()
        .find(|classifier| classifier.name() == name)
}

/// Look up a classifier, falling back to the default when `name` is unknown
pub fn get_or_default(name: &str) -> &'static dyn Classifier {
    get(name).unwrap_or(&WINNOW)
}

impl Classifier for Winnow {
    fn name(&self) -> &'static str {
        DEFAULT_CLASSIFIER
    }

    fn learn(
        &self,
        context: &mut ClassifierContext,
        pool: &mut StatfilePool,
        path: &Path,
        tokens: &TokenSet,
        positive: bool,
    ) -> Result<()> {
        if !pool.is_open(path) {
            return Err(StatError::Classifier(format!(
                "statfile {} is not open",
                path.display()
            )));
        }

        let factor = if positive { PROMOTION } else { DEMOTION };

        for &token in tokens {
            let weight = pool.get(path, token)?.unwrap_or(NEUTRAL_WEIGHT);
            pool.set(path, token, weight * factor)?;
            context.trained += 1;
        }

        pool.flush(path)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sift_common::stats::Stats;
    use tempfile::TempDir;

    use super::*;
    use crate::tokenizer::{Osb, Token, Tokenizer};

    fn setup(dir: &TempDir) -> (StatfilePool, std::path::PathBuf) {
        let path = dir.path().join("spam");
        let mut pool = StatfilePool::new();
        pool.create(&path, 64).unwrap();
        pool.open(&path).unwrap();
        (pool, path)
    }

    #[test]
    fn registry_lookup() {
        assert_eq!(get("winnow").map(Classifier::name), Some("winnow"));
        assert!(get("bayes").is_none());
        assert_eq!(get_or_default("bayes").name(), DEFAULT_CLASSIFIER);
    }

    #[test]
    fn init_accounts_in_scratch() {
        let stats = Arc::new(Stats::default());
        let mut scratch = Scratch::new(Arc::clone(&stats));

        let context = Winnow.init(&mut scratch);

        assert_eq!(context.trained(), 0);
        assert_eq!(scratch.chunks(), 1);
        assert_eq!(stats.snapshot().shared_chunks_allocated, 1);
    }

    #[test]
    fn positive_then_negative_training() {
        let dir = TempDir::new().unwrap();
        let (mut pool, path) = setup(&dir);

        let token = Token { h1: 7, h2: 9 };
        let tokens = TokenSet::from([token]);
        let mut context = ClassifierContext::default();

        Winnow
            .learn(&mut context, &mut pool, &path, &tokens, true)
            .unwrap();
        assert_eq!(pool.get(&path, token).unwrap(), Some(PROMOTION));

        Winnow
            .learn(&mut context, &mut pool, &path, &tokens, false)
            .unwrap();
        assert_eq!(pool.get(&path, token).unwrap(), Some(PROMOTION * DEMOTION));
        assert_eq!(context.trained(), 2);
    }

    #[test]
    fn training_is_flushed() {
        let dir = TempDir::new().unwrap();
        let (mut pool, path) = setup(&dir);

        let mut tokens = TokenSet::new();
        Osb.tokenize(b"cheap pills online now", &mut tokens).unwrap();

        Winnow
            .learn(&mut ClassifierContext::default(), &mut pool, &path, &tokens, true)
            .unwrap();

        let mut reopened = StatfilePool::new();
        reopened.open(&path).unwrap();
        assert_eq!(reopened.len(&path).unwrap(), tokens.len());
    }

    #[test]
    fn unopened_statfile_is_a_classifier_error() {
        let mut pool = StatfilePool::new();
        let result = Winnow.learn(
            &mut ClassifierContext::default(),
            &mut pool,
            Path::new("/nonexistent"),
            &TokenSet::new(),
            true,
        );

        assert!(matches!(result, Err(StatError::Classifier(_))));
    }
}
