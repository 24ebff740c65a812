//! Shell pipeline synthesis for executor containers.
//!
//! An executor's `command` array becomes a single `/bin/sh -c` argument:
//! each arg POSIX-quoted, stdin/stdout/stderr redirections applied per
//! the fields present, `|| true` appended when `ignore_error` is set.
//! Redirection targets get a `mkdir -p` for their parent directory so the
//! shell does not fail on a path the executor was going to create.

use std::borrow::Cow;
use std::path::Path;

use poiesis_models::tes::TesExecutor;

/// POSIX-quote a single word.
fn quote(arg: &str) -> Cow<'_, str> {
    // Non-quotable input (interior NUL) cannot occur in a validated task;
    // fall back to the raw word rather than panicking.
    shlex::try_quote(arg).unwrap_or(Cow::Borrowed(arg))
}

/// Parent directory of a redirection target, if it has one.
fn parent_dir(path: &str) -> Option<String> {
    Path::new(path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_string_lossy().into_owned())
}

/// Assemble the shell command line for one executor.
pub fn build_command_string(executor: &TesExecutor) -> String {
    let mut command = executor
        .command
        .iter()
        .map(|arg| quote(arg))
        .collect::<Vec<_>>()
        .join(" ");

    if let Some(stdin) = &executor.stdin {
        command = format!("{command} < {}", quote(stdin));
    }
    if let Some(stdout) = &executor.stdout {
        command = format!("{command} > {}", quote(stdout));
    }
    if let Some(stderr) = &executor.stderr {
        command = format!("{command} 2> {}", quote(stderr));
    }

    let mut mkdirs: Vec<String> = Vec::new();
    for target in [&executor.stdout, &executor.stderr].into_iter().flatten() {
        if let Some(dir) = parent_dir(target) {
            let mkdir = format!("mkdir -p {}", quote(&dir));
            if !mkdirs.contains(&mkdir) {
                mkdirs.push(mkdir);
            }
        }
    }

    if !mkdirs.is_empty() {
        command = format!("{} && {command}", mkdirs.join(" && "));
    }

    if executor.ignore_error.unwrap_or(false) {
        command.push_str(" || true");
    }

    command
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor(command: &[&str]) -> TesExecutor {
        TesExecutor {
            image: "alpine".to_owned(),
            command: command.iter().map(|s| (*s).to_owned()).collect(),
            ..TesExecutor::default()
        }
    }

    #[test]
    fn plain_command_is_joined() {
        let exec = executor(&["/bin/cat", "/data/in.txt"]);
        assert_eq!(build_command_string(&exec), "/bin/cat /data/in.txt");
    }

    #[test]
    fn arguments_with_spaces_are_quoted() {
        let exec = executor(&["echo", "hello world"]);
        assert_eq!(build_command_string(&exec), "echo 'hello world'");
    }

    #[test]
    fn stdout_only_emits_single_redirection() {
        let exec = TesExecutor {
            stdout: Some("/data/out.txt".to_owned()),
            ..executor(&["/bin/cat", "/data/in.txt"])
        };
        assert_eq!(
            build_command_string(&exec),
            "mkdir -p /data && /bin/cat /data/in.txt > /data/out.txt"
        );
    }

    #[test]
    fn all_redirections_in_order() {
        let exec = TesExecutor {
            stdin: Some("/data/in.txt".to_owned()),
            stdout: Some("/work/out.txt".to_owned()),
            stderr: Some("/work/err.txt".to_owned()),
            ..executor(&["wc", "-l"])
        };
        assert_eq!(
            build_command_string(&exec),
            "mkdir -p /work && wc -l < /data/in.txt > /work/out.txt 2> /work/err.txt"
        );
    }

    #[test]
    fn ignore_error_appends_or_true() {
        let exec = TesExecutor {
            ignore_error: Some(true),
            ..executor(&["false"])
        };
        assert_eq!(build_command_string(&exec), "false || true");
    }

    #[test]
    fn distinct_redirect_parents_each_get_mkdir() {
        let exec = TesExecutor {
            stdout: Some("/a/out.txt".to_owned()),
            stderr: Some("/b/err.txt".to_owned()),
            ..executor(&["true"])
        };
        assert_eq!(
            build_command_string(&exec),
            "mkdir -p /a && mkdir -p /b && true > /a/out.txt 2> /b/err.txt"
        );
    }
}
