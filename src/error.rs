use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("configuration error: {message}")]
    Config { message: String },
    #[error("search graph error while {context}: {message}")]
    Graph {
        context: &'static str,
        message: String,
    },
    #[error("acoustic scorer error while {context}: {message}")]
    Scorer {
        context: &'static str,
        message: String,
    },
    #[error("decoder is {actual}, operation requires {expected}")]
    State {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON parse error while {context}: {source}")]
    Json {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("lattice format error at line {line}: {message}")]
    LatticeFormat { line: usize, message: String },
}

impl DecoderError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn graph(context: &'static str, message: impl Into<String>) -> Self {
        Self::Graph {
            context,
            message: message.into(),
        }
    }

    pub fn scorer(context: &'static str, message: impl Into<String>) -> Self {
        Self::Scorer {
            context,
            message: message.into(),
        }
    }

    pub fn state(expected: &'static str, actual: &'static str) -> Self {
        Self::State { expected, actual }
    }

    pub fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    pub fn json(context: &'static str, source: serde_json::Error) -> Self {
        Self::Json { context, source }
    }

    pub fn lattice_format(line: usize, message: impl Into<String>) -> Self {
        Self::LatticeFormat {
            line,
            message: message.into(),
        }
    }
}
