#![allow(unsafe_code)]

use super::*;
use crate::device::protocol::{DisplayCallbacks, RasterMemory};
use crate::format::display_format::DisplayFormat;
use crate::foundation::config::RenderConfig;
use crate::interp::session::{Interpreter, InterpreterExit, InterpreterIo};

/// Sleeps for as many milliseconds as the program's first byte says, then paints 1x1 BGRX.
struct Sleepy;

impl Interpreter for Sleepy {
    fn execute(
        &mut self,
        _args: &[String],
        io: &mut dyn InterpreterIo,
        display: &mut dyn DisplayCallbacks,
    ) -> Result<(), InterpreterExit> {
        let mut first = [0u8; 1];
        io.read_input(&mut first);
        thread::sleep(Duration::from_millis(u64::from(first[0])));

        let raster = [first[0]; 4];
        let fail = |_| InterpreterExit::code(-1);
        display.open().map_err(fail)?;
        display.presize(1, 1, 4, DisplayFormat::BGRX).map_err(fail)?;
        let memory = unsafe { RasterMemory::new(raster.as_ptr(), 4) }.unwrap();
        display
            .size(1, 1, 4, DisplayFormat::BGRX, memory)
            .map_err(fail)?;
        display.page(1, true).map_err(fail)?;
        display.close().map_err(fail)?;
        Ok(())
    }
}

fn launcher() -> InProcessLauncher {
    InProcessLauncher::new(|| {
        WorkerProcess::new(
            || -> InkResult<Box<dyn Interpreter>> { Ok(Box::new(Sleepy)) },
            RenderConfig::default(),
        )
    })
}

fn job(delay_ms: u8) -> RenderJob {
    RenderJob::new(ClientKey(1), vec![delay_ms], DisplayFormat::BGRX)
}

#[test]
fn in_process_link_runs_jobs() {
    let mut link = launcher().launch(0).unwrap();
    let out = link.run(&job(0), None).unwrap().unwrap();
    assert_eq!(out.decoded.rgb_at(0, 0), [0, 0, 0]);
    let out = link
        .run(&job(5), Some(Duration::from_secs(5)))
        .unwrap()
        .unwrap();
    assert_eq!(out.decoded.rgb_at(0, 0), [5, 5, 5]);
    link.forget_client(ClientKey(1)).unwrap();
    link.shutdown();
}

#[test]
fn in_process_link_times_out() {
    let mut link = launcher().launch(0).unwrap();
    let err = link
        .run(&job(200), Some(Duration::from_millis(10)))
        .unwrap_err();
    assert_eq!(err, LinkError::TimedOut(Duration::from_millis(10)));
}

#[test]
fn link_errors_describe_themselves() {
    assert!(
        LinkError::Failed("worker exited".into())
            .to_string()
            .contains("worker exited")
    );
    assert!(
        LinkError::TimedOut(Duration::from_millis(250))
            .to_string()
            .contains("250ms")
    );
}

#[test]
fn missing_worker_program_fails_to_launch() {
    let launcher = ProcessLauncher::new("/nonexistent/inkraster-worker", vec!["worker".into()]);
    let err = launcher.launch(0).err().unwrap();
    assert!(err.to_string().starts_with("io error:"));
}

#[cfg(unix)]
#[test]
fn worker_process_that_exits_is_a_link_failure() {
    let launcher = ProcessLauncher::new("sh", vec!["-c".into(), "exit 3".into()]);
    let mut link = launcher.launch(0).unwrap();
    let err = link
        .run(&job(0), Some(Duration::from_secs(10)))
        .unwrap_err();
    assert!(matches!(err, LinkError::Failed(_)));
}

#[test]
fn launcher_from_config_defaults_to_current_exe() {
    let cfg = PoolConfig::default();
    let launcher = ProcessLauncher::from_config(&cfg).unwrap();
    assert_eq!(launcher.program, std::env::current_exe().unwrap());
    assert_eq!(launcher.args, vec!["worker".to_string()]);
}
