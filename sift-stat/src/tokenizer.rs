//! Tokenizers turn the text parts of a message into the hashed features a
//! classifier trains on.
//!
//! The only tokenizer shipped is `osb` (orthogonal sparse bigrams): every
//! word is paired with each of the words following it inside a small
//! window, and each pair becomes one [`Token`].

use std::collections::BTreeSet;

use crate::error::{Result, StatError};

pub const DEFAULT_TOKENIZER: &str = "osb";

/// Words considered together, including the leading word
const WINDOW: usize = 5;

/// Words shorter than this carry too little signal to keep
const MIN_WORD_LEN: usize = 2;

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token {
    pub h1: u32,
    pub h2: u32,
}

pub type TokenSet = BTreeSet<Token>;

pub trait Tokenizer: Send + Sync {
    fn name(&self) -> &'static str;

    ///
    /// Add the tokens found in `input` to `tokens`
    ///
    /// # Errors
    /// If `input` is not something this tokenizer can process
    ///
    fn tokenize(&self, input: &[u8], tokens: &mut TokenSet) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct Osb;

static OSB: Osb = Osb;

static TOKENIZERS: [&'static dyn Tokenizer; 1] = [&OSB];

/// Look up a tokenizer by its configured name
pub fn get(name: &str) -> Option<&'static dyn Tokenizer> {
    TOKENIZERS
        .iter()
        .copied()
        .find(|tokenizer| tokenizer.name() == name)
}

fn fnv1a(seed: u32, bytes: &[u8]) -> u32 {
    bytes.iter().fold(seed, |hash, &byte| {
        (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() >= MIN_WORD_LEN)
        .map(str::to_lowercase)
}

impl Tokenizer for Osb {
    fn name(&self) -> &'static str {
        DEFAULT_TOKENIZER
    }

    fn tokenize(&self, input: &[u8], tokens: &mut TokenSet) -> Result<()> {
        if input.contains(&0) {
            return Err(StatError::Tokenizer(
                "binary content in text part".to_string(),
            ));
        }

        let text = String::from_utf8_lossy(input);
        let hashes = words(&text)
            .map(|word| fnv1a(FNV_OFFSET, word.as_bytes()))
            .collect::<Vec<_>>();

        for (position, &first) in hashes.iter().enumerate() {
            for (distance, &second) in hashes.iter().skip(position + 1).take(WINDOW - 1).enumerate() {
                // Mixing in the distance keeps "a b" and "a _ b" apart
                #[allow(clippy::cast_possible_truncation)]
                let h2 = fnv1a(second, &[distance as u8 + 1]);
                tokens.insert(Token { h1: first, h2 });
            }
        }

        Ok(())
    }
}
