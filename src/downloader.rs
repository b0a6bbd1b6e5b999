use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use crate::cancel::CancelToken;
use crate::domain::ItemId;
use crate::error::CategoryError;

/// Fetches one item's media. Only success or failure matters to the caller.
pub trait Downloader {
    fn download(&self, id: &ItemId) -> Result<(), CategoryError>;
}

impl<D: Downloader + ?Sized> Downloader for &D {
    fn download(&self, id: &ItemId) -> Result<(), CategoryError> {
        (**self).download(id)
    }
}

/// Runs an svtplay-dl compatible tool as `<tool> -S -o <output_dir> <url>`.
#[derive(Debug, Clone)]
pub struct SystemDownloader {
    program: String,
    resolved: Option<PathBuf>,
    output_dir: PathBuf,
    cancel: CancelToken,
}

impl SystemDownloader {
    pub fn new(program: &str, output_dir: impl Into<PathBuf>, cancel: CancelToken) -> Self {
        let resolved = if program.contains(std::path::MAIN_SEPARATOR) {
            Some(PathBuf::from(program)).filter(|path| path.exists())
        } else {
            find_in_path(program)
        };
        Self {
            program: program.to_string(),
            resolved,
            output_dir: output_dir.into(),
            cancel,
        }
    }

    pub fn is_available(&self) -> bool {
        self.resolved.is_some()
    }

    pub fn command_line(&self, id: &ItemId) -> String {
        format!(
            "{} -S -o {} {}",
            self.program,
            self.output_dir.display(),
            id.as_str()
        )
    }

    fn build_command(&self, program: &Path, id: &ItemId) -> Command {
        let mut cmd = Command::new(program);
        cmd.arg("-S")
            .arg("-o")
            .arg(&self.output_dir)
            .arg(id.as_str())
            .stdin(Stdio::null());
        // Keep the tool out of the terminal's process group so a single
        // Ctrl+C lets the current download finish.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd
    }
}

impl Downloader for SystemDownloader {
    fn download(&self, id: &ItemId) -> Result<(), CategoryError> {
        let program = self
            .resolved
            .as_ref()
            .ok_or_else(|| CategoryError::MissingTool(self.program.clone()))?;
        std::fs::create_dir_all(&self.output_dir)
            .map_err(|err| CategoryError::Filesystem(err.to_string()))?;

        debug!(command = %self.command_line(id), "running downloader");
        let status = self
            .cancel
            .run_child(&mut self.build_command(program, id))
            .map_err(|err| CategoryError::Download(format!("{}: {err}", self.program)))?;
        if status.success() {
            return Ok(());
        }
        let message = match status.code() {
            Some(code) => format!("{} exited with code {code}", self.program),
            None => format!("{} was terminated by a signal", self.program),
        };
        Err(CategoryError::Download(message))
    }
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}
