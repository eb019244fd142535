use std::process::Command;
use std::time::{Duration, Instant};

use netio::process::{ExitCause, Process};
use netio::Error;

mod util;
use util::run;

fn spawn(program: &str, args: &[&str]) -> std::process::Child {
    Command::new(program)
        .args(args)
        .spawn()
        .expect("failed to spawn child process")
}

#[test]
fn wait_reports_clean_exit() {
    let child = spawn("/bin/true", &[]);

    run(async move {
        let process = Process::from_pid(child.id() as libc::pid_t).unwrap();
        let status = process.wait().await.unwrap();

        assert_eq!(status.cause, ExitCause::Exited);
        assert_eq!(status.status, 0);
        assert!(status.success());
    });
}

#[test]
fn wait_checked_flags_nonzero_exit() {
    let child = spawn("/bin/false", &[]);

    run(async move {
        let pid = child.id() as libc::pid_t;
        let process = Process::from_pid(pid).unwrap();

        match process.wait_checked().await {
            Err(Error::Subprocess {
                pid: reported,
                cause,
                status,
            }) => {
                assert_eq!(reported, pid);
                assert_eq!(cause, ExitCause::Exited);
                assert_eq!(status, 1);
            }
            other => panic!("expected a subprocess failure, got {:?}", other),
        }
    });
}

#[test]
fn kill_interrupts_a_sleeping_child() {
    let child = spawn("/bin/sleep", &["30"]);

    run(async move {
        let process = Process::from_pid(child.id() as libc::pid_t).unwrap();

        let start = Instant::now();
        process.kill(libc::SIGTERM).unwrap();

        let status = process.wait().await.unwrap();

        assert_eq!(status.cause, ExitCause::Killed);
        assert_eq!(status.status, libc::SIGTERM);
        assert!(start.elapsed() < Duration::from_secs(30));
    });
}
