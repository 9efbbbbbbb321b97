//! Include / ignore globs over `<archive>/<path>`

use globset::{Glob, GlobSet, GlobSetBuilder};

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("invalid glob {pattern:?}: {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: globset::Error,
    },
}

/// Decides which corpus files take part in indexing.
#[derive(Debug, Clone)]
pub struct PathFilter {
    include: Option<GlobSet>,
    ignore: GlobSet,
}

impl Default for PathFilter {
    fn default() -> Self {
        PathFilter {
            include: None,
            ignore: GlobSet::empty(),
        }
    }
}

impl PathFilter {
    /// An empty include list admits everything.
    pub fn new<S: AsRef<str>>(include: &[S], ignore: &[S]) -> Result<Self, FilterError> {
        let include = if include.is_empty() {
            None
        } else {
            Some(build_set(include)?)
        };
        Ok(PathFilter {
            include,
            ignore: build_set(ignore)?,
        })
    }

    pub fn accepts(&self, archive: &str, path: &str) -> bool {
        let full = format!("{archive}/{path}");
        if self.ignore.is_match(&full) {
            return false;
        }
        self.include.as_ref().is_none_or(|set| set.is_match(&full))
    }
}

fn build_set<S: AsRef<str>>(patterns: &[S]) -> Result<GlobSet, FilterError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let pattern = pattern.as_ref();
        let glob = Glob::new(pattern).map_err(|source| FilterError::InvalidGlob {
            pattern: pattern.to_string(),
            source,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| FilterError::InvalidGlob {
        pattern: patterns.iter().map(|p| p.as_ref()).collect::<Vec<_>>().join(", "),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_accepts_everything() {
        assert!(PathFilter::default().accepts("A", "source/m.en.tex"));
    }

    #[test]
    fn ignore_wins_over_include() {
        let filter = PathFilter::new(&["smglom/**"], &["**/drafts/**"]).unwrap();
        assert!(filter.accepts("smglom/sets", "source/set.en.tex"));
        assert!(!filter.accepts("smglom/sets", "source/drafts/x.en.tex"));
        assert!(!filter.accepts("other", "source/set.en.tex"));
    }

    #[test]
    fn rejects_invalid_patterns() {
        let err = PathFilter::new(&["a[b"], &[]).unwrap_err();
        assert!(err.to_string().contains("a[b"));
    }
}
