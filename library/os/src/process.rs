use std::process::Stdio;
use std::string::FromUtf8Error;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use error::*;

/// cmd runs any arbitrary system command asynchronously and returns the resulting stdout.
/// The returned stdout is guaranteed to not have any trailing newlines or spaces.
///
/// Every argument is passed to the child as-is. Nothing is ever handed to a shell, so an
/// argument containing spaces or quotes reaches the program as exactly one argument.
///
/// Stderr will be included in any returned error should a stderr be available.
///
/// An optional `timeout=` bounds the wall-clock time of the child. On expiry the child is
/// killed and [ProcessError::TimedOut] is returned.
///
/// ```ignore
/// cmd!("ls").await?;
/// cmd!("ls", "-al").await?;
/// let temp = cmd!("mktemp").await?;
/// let contents = cmd!(stdin = "hello", "cat").await?;
/// cmd!(timeout = Duration::from_secs(1800), "docker", "build", "-t", &tag, &dir).await?;
/// ```
#[macro_export]
macro_rules! cmd {
    (stdin=$stdin:expr, $command:expr $(,$args:expr)*) => {
        $crate::cmd!(@run Some($stdin), None, $command $(,$args)*)
    };
    (timeout=$timeout:expr, $command:expr $(,$args:expr)*) => {
        $crate::cmd!(@run None::<&[u8]>, Some($timeout), $command $(,$args)*)
    };
    (@run $stdin:expr, $timeout:expr, $command:expr $(,$args:expr)*) => {
        {
            let mut cmd = tokio::process::Command::new($command);
            $(cmd.arg($args);)*
            let mut debug_string: Vec<String> = vec![format!("{}", $command)];
            $(
                debug_string.push(format!("{}", $args));
            )*
            let debug_string: String = debug_string.join(" ");
            $crate::process::exec($stdin, $timeout, cmd, debug_string)
        }
    };
    ($command:expr $(,$args:expr)*) => {
        $crate::cmd!(@run None::<&[u8]>, None, $command $(,$args)*)
    };
}

pub async fn exec<S: AsRef<[u8]>>(
    stdin: Option<S>,
    timeout: Option<Duration>,
    mut cmd: Command,
    debug_string: String,
) -> Result<String, ProcessError> {
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    // Dropping the child (which is what a timeout does to the future below) kills it.
    cmd.kill_on_drop(true);
    let mut child = cmd.spawn().map_err(|source| ProcessError::FailedToSpawn {
        command: debug_string.clone(),
        source,
    })?;
    if let Some(stdin) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(stdin.as_ref())
                .await
                .map_err(|source| ProcessError::FailedToWriteStdin {
                    command: debug_string.clone(),
                    source,
                })?;
            // Closing the pipe is what tells the child that its input is over.
            drop(pipe);
        }
    };
    let output = match timeout {
        Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| ProcessError::TimedOut {
                command: debug_string.clone(),
                limit,
            })?,
        None => child.wait_with_output().await,
    }
    .map_err(|source| ProcessError::FailedToRun {
        command: debug_string.clone(),
        source,
    })?;
    if !output.status.success() {
        // A stderr that is not UTF-8 is still worth reporting, so it is decoded lossily.
        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
        return Err(ProcessError::CommandFailed {
            command: debug_string,
            status: output.status.code(),
            stderr,
        });
    }
    let stdout = String::from_utf8(output.stdout).map_err(|source| ProcessError::InvalidUtf8 {
        output: String::from_utf8_lossy(source.as_bytes()).to_string(),
        command: debug_string.clone(),
        source,
    })?;
    Ok(stdout.trim_end().to_string())
}

#[derive(Error, LfmError, Kind, HttpCode, Debug)]
#[code(Status::InternalServerError)]
pub enum ProcessError {
    #[error(r#"Failed to spawn the "{command}" command. Is it installed and on the PATH?"#)]
    FailedToSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error(r#"Failed to write to the stdin of "{command}""#)]
    FailedToWriteStdin {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error(r#"Failed to execute the "{command}" command"#)]
    FailedToRun {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error(r#""{command}" did not finish within {limit:?} and was killed"#)]
    TimedOut { command: String, limit: Duration },
    #[error(r#"Stdout for "{command}" was not valid UTF-8, got the following (lossy) {output}"#)]
    InvalidUtf8 {
        command: String,
        // This is going to be a "lossy" string so it
        // might have some strange looking runes in it.
        output: String,
        #[source]
        source: FromUtf8Error,
    },
    #[error(r#"Failed to execute "{command}" (exit status {status:?}). Stderr was {stderr}"#)]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
}
