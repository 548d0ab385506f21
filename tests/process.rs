#![cfg(unix)]

use futures::StreamExt;
use sigbridge::{
    Encoding, Error, EventQueue, Process, ProcessState, Runtime, Task, run_process, stream_text,
    with_timeout,
};
use std::process::Command;
use std::time::{Duration, Instant};

fn shell(script: &str) -> Process {
    let mut command = Command::new("sh");
    command.args(["-c", script]);
    Process::new(command)
}

#[test]
fn test_run_process_collects_exit_status_and_output() {
    let mut rt = Runtime::new();
    let process = shell("printf 42");

    let status = rt
        .block_on({
            let process = process.clone();
            async move { run_process(&process).await }
        })
        .unwrap();

    assert!(status.success(), "status was {status:?}");
    assert_eq!(status.code, Some(0));
    assert_eq!(process.state(), ProcessState::Finished);
    assert_eq!(process.read_all_stdout(), b"42");
}

#[test]
fn test_exit_code_is_reported() {
    let mut rt = Runtime::new();
    let process = shell("exit 3");

    let status = rt
        .block_on(async move { run_process(&process).await })
        .unwrap();

    assert!(!status.success());
    assert_eq!(status.code, Some(3));
    assert!(!status.crashed);
}

#[test]
fn test_missing_program_fails_to_start() {
    let mut rt = Runtime::new();
    let process = Process::new(Command::new("/nonexistent/sigbridge-test-binary"));

    let result = rt.block_on(async move { run_process(&process).await });

    assert!(matches!(result, Err(Error::Process { .. })), "got {result:?}");
}

#[test]
fn test_process_cannot_start_twice() {
    let _rt = Runtime::new();
    let process = shell("true");

    process.start().unwrap();

    assert!(matches!(process.start(), Err(Error::Process { .. })));
}

#[test]
fn test_finished_signal_carries_code_and_crash_flag() {
    let mut rt = Runtime::new();
    let process = shell("exit 1");
    let finished = EventQueue::new();
    finished.subscribe(&process).unwrap();

    let notification = rt
        .block_on(async move {
            process.start()?;
            finished.wait().await
        })
        .unwrap();

    assert_eq!(notification.kind(), "finished");
    assert_eq!(notification[0].as_int(), Some(1));
    assert_eq!(notification[1].as_bool(), Some(false));
}

#[test]
fn test_stdin_is_forwarded() {
    let mut rt = Runtime::new();
    let process = shell("cat");

    let text = rt
        .block_on({
            let process = process.clone();
            async move {
                let mut output = stream_text(process.clone(), Encoding::Utf8);
                process.start()?;
                process.write_stdin(b"echoed back")?;
                process.close_stdin();

                let mut text = String::new();
                while let Some(fragment) = output.next().await {
                    text.push_str(&fragment?);
                }
                Ok(text)
            }
        })
        .unwrap();

    assert_eq!(text, "echoed back");
}

#[test]
fn test_timeout_kills_running_process() {
    let mut rt = Runtime::new();
    let mut command = Command::new("sleep");
    command.arg("5");
    let process = Process::new(command);

    let start = Instant::now();
    let result = rt.block_on({
        let process = process.clone();
        async move {
            let waiter = Task::start(async move { run_process(&process).await });
            with_timeout(waiter, Duration::from_millis(50)).await
        }
    });

    assert!(matches!(result, Err(Error::TimeoutExpired { .. })), "got {result:?}");
    assert!(start.elapsed() < Duration::from_secs(2));

    // Let the reader thread report the exit of the killed child.
    rt.run();

    let status = process.exit_status().expect("killed process exited");
    assert!(status.crashed, "SIGKILL shows up as a crash: {status:?}");
    assert!(start.elapsed() < Duration::from_secs(4));
}
