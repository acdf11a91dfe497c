use rand::Rng;
use std::fmt;

/// Upper bound (exclusive) of the random suffix added to working names.
const WORKING_SUFFIX_RANGE: u32 = 100_000;

/// One unit of work: the blob key of a source image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Task {
    pub key: String,
}

impl Task {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Split the key into the parts the pipeline names its files after.
    pub fn image_name(&self) -> Result<ImageName, InvalidTaskKey> {
        ImageName::parse(&self.key)
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// The tasks received from one poll, in queue order.
pub type Batch = Vec<Task>;

/// The last path segment of a blob key, split into base name and extension.
///
/// `images/cat.png` yields base `cat` and extension `png`. Only the final `.`
/// separates the extension, so `photos/a.b.jpg` has base `a.b`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageName {
    pub base: String,
    pub extension: String,
}

impl ImageName {
    pub fn parse(key: &str) -> Result<Self, InvalidTaskKey> {
        let name = key.rsplit('/').next().unwrap_or(key);
        match name.rsplit_once('.') {
            Some((base, ext)) if !base.is_empty() && !ext.is_empty() => Ok(Self {
                base: base.to_string(),
                extension: ext.to_string(),
            }),
            _ => Err(InvalidTaskKey(key.to_string())),
        }
    }

    /// Collision-resistant local name: `<base>-<random>.<ext>`.
    ///
    /// The suffix only separates concurrent pipelines working on the same key.
    pub fn working_name(&self) -> String {
        let suffix = rand::rng().random_range(0..WORKING_SUFFIX_RANGE);
        self.working_name_with(suffix)
    }

    pub fn working_name_with(&self, suffix: u32) -> String {
        format!("{}-{}.{}", self.base, suffix, self.extension)
    }
}

/// Scratch file name for one transform's output of a working file.
pub fn transform_output_name(working_name: &str, transform_suffix: &str) -> String {
    format!("{}-{}.png", working_name, transform_suffix)
}

/// Destination key `<folder>/<base>-<suffix>-<epoch_millis>.png`.
pub fn result_key(folder: &str, base: &str, transform_suffix: &str, epoch_millis: i64) -> String {
    let folder = folder.trim_end_matches('/');
    if folder.is_empty() {
        format!("{}-{}-{}.png", base, transform_suffix, epoch_millis)
    } else {
        format!("{}/{}-{}-{}.png", folder, base, transform_suffix, epoch_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Task key has no usable image name: {0:?}")]
pub struct InvalidTaskKey(pub String);
