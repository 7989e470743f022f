//! Parsing `learn` commands and training on the payload that follows.

use std::{
    fmt::{self, Debug, Formatter},
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use sift_common::{internal, scratch::Scratch};
use sift_stat::{
    BLOCK_SIZE, Classifier, MimePart, StatError, StatfilePool, TokenSet, Tokenizer, classifier,
    message, tokenizer,
};

use crate::{
    Services,
    error::{LearnFailure, LearnRejection},
};

/// Everything needed to train on a payload once it arrives
pub struct LearnRequest {
    pub filename: PathBuf,
    pub recipient: Option<String>,
    pub from: Option<String>,
    pub tokenizer: &'static dyn Tokenizer,
    pub classifier: &'static dyn Classifier,
    pub size: usize,
    pub positive: bool,
}

impl Debug for LearnRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("LearnRequest")
            .field("filename", &self.filename)
            .field("recipient", &self.recipient)
            .field("from", &self.from)
            .field("tokenizer", &self.tokenizer.name())
            .field("classifier", &self.classifier.name())
            .field("size", &self.size)
            .field("positive", &self.positive)
            .finish()
    }
}

fn parse_size(size: &str) -> Result<usize, LearnRejection> {
    if size.is_empty() || !size.bytes().all(|b| b.is_ascii_digit()) {
        return Err(LearnRejection::InvalidSize);
    }

    size.parse().map_err(|_| LearnRejection::InvalidSize)
}

///
/// Validate `learn <statfile> <size> [-r rcpt] [-f from] [-n]` and make sure
/// the target statfile exists
///
/// # Errors
/// The reason the command was refused; nothing has been changed when this fails
///
pub fn prepare(
    args: &[&str],
    scratch: &mut Scratch,
    services: &Services,
    max_size: usize,
) -> Result<LearnRequest, LearnRejection> {
    let [name, size, flags @ ..] = args else {
        return Err(LearnRejection::MissingArguments);
    };

    let size = parse_size(size)?;
    if size > max_size {
        return Err(LearnRejection::TooLarge);
    }

    let statfile = services
        .stat
        .statfile(name)
        .ok_or_else(|| LearnRejection::UnknownStatfile((*name).to_string()))?;

    let classifier = classifier::get_or_default(services.stat.classifier_for(statfile));
    let tokenizer = tokenizer::get(&statfile.tokenizer).ok_or(LearnRejection::UnknownTokenizer)?;

    let mut recipient = None;
    let mut from = None;
    let mut positive = true;

    let mut flags = flags.iter();
    while let Some(&flag) = flags.next() {
        match flag {
            "-r" => {
                let value = flags.next().ok_or(LearnRejection::MissingRecipient)?;
                recipient = Some(scratch.strdup(value));
            }
            "-f" => {
                let value = flags.next().ok_or(LearnRejection::MissingFrom)?;
                from = Some(scratch.strdup(value));
            }
            "-n" => positive = false,
            flag if flag.starts_with('-') => {
                return Err(LearnRejection::UnknownFlag(flag.to_string()));
            }
            _ => {}
        }
    }

    let filename = statfile
        .resolve(recipient.as_deref(), from.as_deref())
        .map_err(|err| match err {
            StatError::InvalidPath(path) => LearnRejection::InvalidPath(path),
            err => LearnRejection::InvalidPath(err.to_string()),
        })?;

    open_or_create(&services.pool, &filename, statfile.size / BLOCK_SIZE)?;

    Ok(LearnRequest {
        filename,
        recipient,
        from,
        tokenizer,
        classifier,
        size,
        positive,
    })
}

fn open_or_create(
    pool: &Mutex<StatfilePool>,
    path: &Path,
    blocks: u64,
) -> Result<(), LearnRejection> {
    let mut pool = pool.lock().unwrap_or_else(PoisonError::into_inner);

    match pool.open(path) {
        Ok(()) => return Ok(()),
        Err(StatError::NotFound(_)) => {}
        Err(err) => tracing::debug!("Unable to open {}: {err}", path.display()),
    }

    pool.create(path, blocks).map_err(|err| {
        internal!(
            level = WARN,
            "Cannot create statfile {}: {err}",
            path.display()
        );
        LearnRejection::CannotCreate(path.to_path_buf())
    })?;

    pool.open(path).map_err(|err| {
        internal!(level = WARN, "Cannot open statfile {}: {err}", path.display());
        LearnRejection::CannotOpen(path.to_path_buf())
    })
}

///
/// Decode `payload` into `parts`, tokenize its text parts and train the
/// requested statfile
///
/// `parts` is left holding the decoded parts; the caller clears them.
///
/// # Errors
/// If tokenizing or training fails
///
pub fn train(
    request: &LearnRequest,
    payload: &[u8],
    parts: &mut Vec<MimePart>,
    scratch: &mut Scratch,
    services: &Services,
) -> Result<(), LearnFailure> {
    parts.extend(message::decode(payload).into_iter().map(|mut part| {
        part.content = scratch.adopt(part.content);
        part
    }));

    let mut tokens = TokenSet::new();
    for part in parts.iter().filter(|part| part.is_text) {
        request
            .tokenizer
            .tokenize(&part.content, &mut tokens)
            .map_err(|err| {
                internal!(
                    level = WARN,
                    "Tokenizer {} failed on {} part: {err}",
                    request.tokenizer.name(),
                    part.content_type
                );
                LearnFailure::Tokenizer
            })?;
    }

    let mut context = request.classifier.init(scratch);
    let mut pool = services.pool.lock().unwrap_or_else(PoisonError::into_inner);

    request
        .classifier
        .learn(
            &mut context,
            &mut pool,
            &request.filename,
            &tokens,
            request.positive,
        )
        .map_err(|err| {
            internal!(
                level = WARN,
                "Classifier {} failed to train {}: {err}",
                request.classifier.name(),
                request.filename.display()
            );
            LearnFailure::Classifier
        })?;

    tracing::debug!(
        statfile = %request.filename.display(),
        parts = parts.len(),
        tokens = context.trained(),
        positive = request.positive,
        "Learned message"
    );

    Ok(())
}
