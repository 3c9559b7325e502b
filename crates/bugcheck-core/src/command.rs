//! Deterministic analyzer invocations.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{HarnessError, HarnessResult};

/// Language frontend the analyzer should use for a source file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Frontend {
    /// C via clang
    C,

    /// C++ via clang++
    Cpp,

    /// Objective-C via clang
    Objc,

    /// Java via javac
    Java,
}

impl Frontend {
    /// Get the frontend name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Frontend::C => "c",
            Frontend::Cpp => "cpp",
            Frontend::Objc => "objc",
            Frontend::Java => "java",
        }
    }

    /// Get the analyzer flag selecting this frontend.
    pub fn flag(&self) -> &'static str {
        match self {
            Frontend::C => "--frontend=clang",
            Frontend::Cpp => "--frontend=clang++",
            Frontend::Objc => "--frontend=clang-objc",
            Frontend::Java => "--frontend=javac",
        }
    }

    /// Guess the frontend from a source file extension.
    pub fn from_extension(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "c" => Some(Frontend::C),
            "cc" | "cpp" | "cxx" | "C" => Some(Frontend::Cpp),
            "m" | "mm" => Some(Frontend::Objc),
            "java" => Some(Frontend::Java),
            _ => None,
        }
    }
}

impl std::str::FromStr for Frontend {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "c" | "clang" => Ok(Frontend::C),
            "cpp" | "c++" | "clang++" => Ok(Frontend::Cpp),
            "objc" | "objective-c" => Ok(Frontend::Objc),
            "java" | "javac" => Ok(Frontend::Java),
            other => Err(HarnessError::Configuration(format!(
                "unknown frontend: {}",
                other
            ))),
        }
    }
}

/// Language-specific flags for one source file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LanguageFlags {
    /// Frontend selector.
    pub frontend: Frontend,

    /// Include paths, emitted as `-I<path>` in the given order.
    #[serde(default)]
    pub include_paths: Vec<PathBuf>,

    /// Preprocessor defines, emitted as `-D<define>` in the given order.
    #[serde(default)]
    pub defines: Vec<String>,

    /// Passed through verbatim after the other flags.
    #[serde(default)]
    pub extra: Vec<String>,
}

impl LanguageFlags {
    pub fn new(frontend: Frontend) -> Self {
        Self {
            frontend,
            include_paths: Vec::new(),
            defines: Vec::new(),
            extra: Vec::new(),
        }
    }

    pub fn include(mut self, path: impl Into<PathBuf>) -> Self {
        self.include_paths.push(path.into());
        self
    }

    pub fn define(mut self, define: impl Into<String>) -> Self {
        self.defines.push(define.into());
        self
    }
}

/// A fully resolved analyzer command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    /// Resolved analyzer binary.
    pub program: PathBuf,

    /// Arguments, in order.
    pub args: Vec<String>,
}

impl Invocation {
    /// All tokens, program first.
    pub fn tokens(&self) -> Vec<String> {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tokens().join(" "))
    }
}

/// Builds analyzer invocations.
pub struct CommandBuilder<'a> {
    analyzer: &'a Path,
    source_root: &'a Path,
    results_dir_flag: Option<&'a str>,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(analyzer: &'a Path, source_root: &'a Path) -> Self {
        Self {
            analyzer,
            source_root,
            results_dir_flag: None,
        }
    }

    /// Pass the per-run results directory behind `flag`.
    pub fn results_dir_flag(mut self, flag: Option<&'a str>) -> Self {
        self.results_dir_flag = flag;
        self
    }

    /// Build the invocation for `source`, relative to the source root.
    ///
    /// Token order:
    /// `<analyzer> <frontend-flag> <source> [-I..] [-D..] [extra..] [<flag> <results-dir>]`
    pub fn build(
        &self,
        source: &Path,
        flags: &LanguageFlags,
        results_dir: Option<&Path>,
    ) -> HarnessResult<Invocation> {
        let program = resolve_binary(self.analyzer)?;

        let on_disk = self.source_root.join(source);
        if !on_disk.is_file() {
            return Err(HarnessError::Configuration(format!(
                "source file not found: {}",
                on_disk.display()
            )));
        }

        let mut args = Vec::with_capacity(
            2 + flags.include_paths.len() + flags.defines.len() + flags.extra.len() + 2,
        );
        args.push(flags.frontend.flag().to_string());
        args.push(source.to_string_lossy().into_owned());
        args.extend(
            flags
                .include_paths
                .iter()
                .map(|p| format!("-I{}", p.display())),
        );
        args.extend(flags.defines.iter().map(|d| format!("-D{}", d)));
        args.extend(flags.extra.iter().cloned());

        if let (Some(flag), Some(dir)) = (self.results_dir_flag, results_dir) {
            args.push(flag.to_string());
            args.push(dir.to_string_lossy().into_owned());
        }

        Ok(Invocation { program, args })
    }
}

/// Locate the analyzer binary.
///
/// A name with a path separator must exist as given; a bare name is searched
/// for on `PATH`.
pub fn resolve_binary(analyzer: &Path) -> HarnessResult<PathBuf> {
    if analyzer.components().count() > 1 || analyzer.is_absolute() {
        if analyzer.is_file() {
            return Ok(analyzer.to_path_buf());
        }
        return Err(HarnessError::Configuration(format!(
            "analyzer binary not found: {}",
            analyzer.display()
        )));
    }

    let path_var = std::env::var_os("PATH").unwrap_or_default();
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(analyzer))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            HarnessError::Configuration(format!(
                "analyzer binary {} not found on PATH",
                analyzer.display()
            ))
        })
}
