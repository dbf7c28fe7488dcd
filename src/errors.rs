use std::fmt;
use std::sync::PoisonError;
use thiserror::Error;

pub type PdgResult<T, E = PdgError> = Result<T, E>;

#[derive(Debug, Error)]
pub enum PdgError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("tree-sitter error: {0}")]
    TreeSitter(#[from] tree_sitter::LanguageError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("poisoned lock: {0}")]
    Poison(String),

    #[error("{0}")]
    Msg(String),
}

impl<T> From<PoisonError<T>> for PdgError
where
    T: fmt::Debug,
{
    fn from(err: PoisonError<T>) -> Self {
        PdgError::Poison(err.to_string())
    }
}

impl From<&str> for PdgError {
    fn from(s: &str) -> Self {
        PdgError::Msg(s.to_owned())
    }
}

impl From<String> for PdgError {
    fn from(s: String) -> Self {
        PdgError::Msg(s)
    }
}

#[test]
fn io_conversion_retains_message() {
    let e = std::io::Error::other("boom!");
    let p: PdgError = e.into();
    assert!(matches!(p, PdgError::Io(_)));
    assert!(p.to_string().contains("boom"));
}

#[test]
fn poison_conversion_maps_correct_variant() {
    let lock = std::sync::Arc::new(std::sync::Mutex::new(()));

    {
        let lock2 = std::sync::Arc::clone(&lock);
        std::thread::spawn(move || {
            let _guard = lock2.lock().unwrap();
            panic!("intentional - poison the mutex");
        })
        .join()
        .ok();
    }

    let poison = lock.lock().unwrap_err();
    let pdg: PdgError = poison.into();

    assert!(matches!(pdg, PdgError::Poison(_)));
}

#[test]
fn simple_string_into_msg() {
    let pdg: PdgError = "plain msg".into();
    assert!(matches!(pdg, PdgError::Msg(s) if s == "plain msg"));
}
