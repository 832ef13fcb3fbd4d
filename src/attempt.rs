//! A disjoint success-or-failure value.
//!
//! [`Attempt`] is what `with_attempt` resolves to: the task's outcome folded
//! into a plain value, so the converted task itself never fails and callers
//! can inspect the result without going through the engine's error surface.

use std::sync::Arc;

use crate::error::TaskError;

/// The captured outcome of a task: either its value or its error.
#[derive(Clone, Debug)]
pub enum Attempt<T> {
    /// The task resolved with this value.
    Success(T),
    /// The task failed or was cancelled with this error.
    Failure(Arc<TaskError>),
}

impl<T> Attempt<T> {
    /// True if this attempt captured a failure.
    pub fn is_failed(&self) -> bool {
        matches!(self, Attempt::Failure(_))
    }

    /// The success value, if any.
    pub fn get(&self) -> Option<&T> {
        match self {
            Attempt::Success(v) => Some(v),
            Attempt::Failure(_) => None,
        }
    }

    /// The captured error, if any.
    pub fn error(&self) -> Option<&Arc<TaskError>> {
        match self {
            Attempt::Success(_) => None,
            Attempt::Failure(e) => Some(e),
        }
    }

    /// Converts back into a `Result`, cloning nothing.
    pub fn into_result(self) -> Result<T, Arc<TaskError>> {
        match self {
            Attempt::Success(v) => Ok(v),
            Attempt::Failure(e) => Err(e),
        }
    }
}

impl<T> From<Result<T, Arc<TaskError>>> for Attempt<T> {
    fn from(r: Result<T, Arc<TaskError>>) -> Self {
        match r {
            Ok(v) => Attempt::Success(v),
            Err(e) => Attempt::Failure(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_accessors() {
        let a = Attempt::Success(7);
        assert!(!a.is_failed());
        assert_eq!(a.get(), Some(&7));
        assert!(a.error().is_none());
    }

    #[test]
    fn failure_accessors() {
        let a: Attempt<i32> = Attempt::Failure(Arc::new(TaskError::Failed("err".into())));
        assert!(a.is_failed());
        assert!(a.get().is_none());
        assert_eq!(a.error().unwrap().to_string(), "err");
    }
}
