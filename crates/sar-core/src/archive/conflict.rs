//! Conflict resolution when an extracted entry meets an existing object

use crate::{Error, Result};
use std::io;
use std::path::Path;
use tracing::{debug, warn};

/// Operator answer to an overwrite question
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptChoice {
    /// Overwrite this object
    Yes,
    /// Keep this object
    No,
    /// Overwrite this and every later conflict
    AllRemaining,
    /// Keep this and every later conflict
    NoneRemaining,
    /// Stop the extraction
    Quit,
}

/// Source of overwrite decisions, usually an operator at a terminal
pub trait Prompt {
    /// Whether questions can be asked at all (e.g. stdin is a terminal)
    fn is_available(&self) -> bool {
        true
    }

    fn ask(&mut self, path: &Path) -> io::Result<PromptChoice>;
}

/// What to do with the existing object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Replace,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    Skip,
    Ask,
    Overwrite,
}

/// Session-scoped conflict state: "all" and "none" answers stick for the
/// rest of the run
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    policy: ConflictPolicy,
}

impl ConflictResolver {
    pub fn new(overwrite: bool, can_ask: bool) -> Self {
        let policy = if overwrite {
            ConflictPolicy::Overwrite
        } else if can_ask {
            ConflictPolicy::Ask
        } else {
            ConflictPolicy::Skip
        };
        Self { policy }
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    pub fn overwrites(&self) -> bool {
        self.policy == ConflictPolicy::Overwrite
    }

    /// Decide for one conflicting `path`.
    ///
    /// A failing prompt turns prompting off and skips; a quit answer yields
    /// [`Error::ExtractionAborted`].
    pub fn resolve<P>(&mut self, path: &Path, prompt: Option<&mut P>) -> Result<Resolution>
    where
        P: Prompt + ?Sized,
    {
        match self.policy {
            ConflictPolicy::Overwrite => return Ok(Resolution::Replace),
            ConflictPolicy::Skip => return Ok(Resolution::Skip),
            ConflictPolicy::Ask => {}
        }

        let Some(prompt) = prompt else {
            self.policy = ConflictPolicy::Skip;
            return Ok(Resolution::Skip);
        };

        let choice = match prompt.ask(path) {
            Ok(choice) => choice,
            Err(e) => {
                warn!(error = %e, "Reading answer failed, disabling interactive mode");
                self.policy = ConflictPolicy::Skip;
                return Ok(Resolution::Skip);
            }
        };
        debug!(path = ?path, choice = ?choice, "Conflict answered");

        match choice {
            PromptChoice::Yes => Ok(Resolution::Replace),
            PromptChoice::No => Ok(Resolution::Skip),
            PromptChoice::AllRemaining => {
                self.policy = ConflictPolicy::Overwrite;
                Ok(Resolution::Replace)
            }
            PromptChoice::NoneRemaining => {
                self.policy = ConflictPolicy::Skip;
                Ok(Resolution::Skip)
            }
            PromptChoice::Quit => Err(Error::ExtractionAborted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Scripted {
        answers: VecDeque<io::Result<PromptChoice>>,
        asked: usize,
    }

    impl Scripted {
        fn new(answers: Vec<io::Result<PromptChoice>>) -> Self {
            Self {
                answers: answers.into(),
                asked: 0,
            }
        }
    }

    impl Prompt for Scripted {
        fn ask(&mut self, _path: &Path) -> io::Result<PromptChoice> {
            self.asked += 1;
            self.answers
                .pop_front()
                .unwrap_or_else(|| Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no answer")))
        }
    }

    #[test]
    fn test_initial_policy() {
        assert_eq!(ConflictResolver::new(true, true).policy(), ConflictPolicy::Overwrite);
        assert_eq!(ConflictResolver::new(false, true).policy(), ConflictPolicy::Ask);
        assert_eq!(ConflictResolver::new(false, false).policy(), ConflictPolicy::Skip);
    }

    #[test]
    fn test_yes_and_no_do_not_stick() {
        let mut prompt = Scripted::new(vec![Ok(PromptChoice::Yes), Ok(PromptChoice::No)]);
        let mut resolver = ConflictResolver::new(false, true);
        let path = Path::new("a");

        assert_eq!(resolver.resolve(path, Some(&mut prompt)).unwrap(), Resolution::Replace);
        assert_eq!(resolver.resolve(path, Some(&mut prompt)).unwrap(), Resolution::Skip);
        assert_eq!(resolver.policy(), ConflictPolicy::Ask);
        assert_eq!(prompt.asked, 2);
    }

    #[test]
    fn test_all_overwrites_without_asking_again() {
        let mut prompt = Scripted::new(vec![Ok(PromptChoice::AllRemaining)]);
        let mut resolver = ConflictResolver::new(false, true);

        for _ in 0..3 {
            assert_eq!(
                resolver.resolve(Path::new("x"), Some(&mut prompt)).unwrap(),
                Resolution::Replace
            );
        }
        assert_eq!(prompt.asked, 1);
        assert!(resolver.overwrites());
    }

    #[test]
    fn test_none_skips_without_asking_again() {
        let mut prompt = Scripted::new(vec![Ok(PromptChoice::NoneRemaining)]);
        let mut resolver = ConflictResolver::new(false, true);

        for _ in 0..3 {
            assert_eq!(
                resolver.resolve(Path::new("x"), Some(&mut prompt)).unwrap(),
                Resolution::Skip
            );
        }
        assert_eq!(prompt.asked, 1);
    }

    #[test]
    fn test_quit_aborts() {
        let mut prompt = Scripted::new(vec![Ok(PromptChoice::Quit)]);
        let mut resolver = ConflictResolver::new(false, true);
        assert!(matches!(
            resolver.resolve(Path::new("x"), Some(&mut prompt)),
            Err(Error::ExtractionAborted)
        ));
    }

    #[test]
    fn test_prompt_failure_disables_prompting() {
        let mut prompt = Scripted::new(vec![]);
        let mut resolver = ConflictResolver::new(false, true);

        assert_eq!(
            resolver.resolve(Path::new("x"), Some(&mut prompt)).unwrap(),
            Resolution::Skip
        );
        assert_eq!(resolver.policy(), ConflictPolicy::Skip);
        resolver.resolve(Path::new("y"), Some(&mut prompt)).unwrap();
        assert_eq!(prompt.asked, 1);
    }
}
