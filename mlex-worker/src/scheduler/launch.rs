//! Launch preparation
//!
//! Turns a claimed job and the worker's requirements into a [`LaunchSpec`]:
//! container naming, argv construction, snapshot wrapping of the command when
//! a working directory is mounted, and resource provisioning.

use mlex_core::domain::job::{Job, JobCommand};
use mlex_core::domain::worker::Requirements;
use thiserror::Error;

use crate::error::{Result, WorkerError};
use crate::runtime::{GpuRequest, LaunchSpec, SNAPSHOT_AFTER, SNAPSHOT_BEFORE, WORKDIR_MOUNT};

/// Errors splitting a shell-style command into argv
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unterminated {0} quote")]
    UnterminatedQuote(char),

    #[error("trailing backslash")]
    TrailingEscape,
}

/// Builds the launch parameters of a job
pub fn launch_spec(job: &Job, requirements: &Requirements) -> Result<LaunchSpec> {
    job.validate().map_err(WorkerError::InvalidJob)?;

    let kwargs = &job.job_kwargs;
    let (command, volume_binds) = match &job.working_directory {
        Some(dir) => (
            snapshot_command(&command_line(&kwargs.command)),
            vec![format!("{}:{}", dir, WORKDIR_MOUNT)],
        ),
        None => {
            let argv = match &kwargs.command {
                JobCommand::Shell(cmd) => split_command(cmd)?,
                JobCommand::Argv(argv) => argv.clone(),
            };
            (argv, Vec::new())
        }
    };

    let gpu_request = if requirements.gpu_ids.is_empty() {
        None
    } else {
        Some(GpuRequest {
            device_ids: requirements.gpu_ids.clone(),
        })
    };

    Ok(LaunchSpec {
        name: container_name(&job.uid),
        image: kwargs.image.clone(),
        command,
        cpus: requirements.num_processors,
        gpu_request,
        ports: kwargs.port_map.clone().unwrap_or_default(),
        volume_binds,
    })
}

/// Deterministic container name for a job uid
///
/// One name per job means a second `run` for the same job collides instead of
/// starting a duplicate container.
pub fn container_name(job_uid: &str) -> String {
    let sanitized: String = job_uid
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("mlex-{}", sanitized)
}

/// Wraps a shell command line so directory listings bracket it
pub fn snapshot_command(command_line: &str) -> Vec<String> {
    vec![
        "bash".to_string(),
        "-c".to_string(),
        format!(
            "tree -ifo {} ; {} ; tree -ifo {}",
            SNAPSHOT_BEFORE, command_line, SNAPSHOT_AFTER
        ),
    ]
}

/// Shell text of a job command
fn command_line(command: &JobCommand) -> String {
    match command {
        JobCommand::Shell(cmd) => cmd.clone(),
        JobCommand::Argv(argv) => argv
            .iter()
            .map(|arg| quote_arg(arg))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

fn quote_arg(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Splits a command line into argv following POSIX shell quoting
pub fn split_command(command: &str) -> std::result::Result<Vec<String>, CommandError> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => word.push(c),
                        None => return Err(CommandError::UnterminatedQuote('\'')),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\' | '$' | '`')) => word.push(c),
                            Some('\n') => {}
                            Some(c) => {
                                word.push('\\');
                                word.push(c);
                            }
                            None => return Err(CommandError::UnterminatedQuote('"')),
                        },
                        Some(c) => word.push(c),
                        None => return Err(CommandError::UnterminatedQuote('"')),
                    }
                }
            }
            '\\' => match chars.next() {
                Some('\n') => {}
                Some(c) => {
                    in_word = true;
                    word.push(c);
                }
                None => return Err(CommandError::TrailingEscape),
            },
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                word.push(c);
            }
        }
    }

    if in_word {
        words.push(word);
    }
    Ok(words)
}
