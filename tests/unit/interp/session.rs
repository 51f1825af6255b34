use super::*;

fn drain(io: &mut ProgramIo<'_>, chunk: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; chunk];
    loop {
        let n = io.read_input(&mut buf);
        assert!(n >= 0);
        if n == 0 {
            return out;
        }
        out.extend_from_slice(&buf[..n as usize]);
    }
}

#[test]
fn parts_are_streamed_in_order() {
    let prelude = b"/A 1 def\n".as_slice();
    let body = b"showpage\n".as_slice();
    let mut io = ProgramIo::new(&[prelude, body]);
    assert_eq!(drain(&mut io, 3), b"/A 1 def\nshowpage\n");
}

#[test]
fn read_errors_report_minus_one() {
    struct Broken;
    impl Read for Broken {
        fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk gone"))
        }
    }
    let mut io = ProgramIo::from_reader(Broken);
    assert_eq!(io.read_input(&mut [0u8; 8]), -1);
}

#[test]
fn interrupted_reads_are_retried() {
    struct Flaky(bool);
    impl Read for Flaky {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.0 {
                self.0 = true;
                return Err(ErrorKind::Interrupted.into());
            }
            buf[0] = b'x';
            Ok(1)
        }
    }
    let mut io = ProgramIo::from_reader(Flaky(false));
    assert_eq!(io.read_input(&mut [0u8; 8]), 1);
}

#[test]
fn stderr_tail_is_bounded() {
    let mut io = ProgramIo::new(&[]);
    io.write_stderr(b"Error: /undefined in foo\n");
    assert_eq!(io.diagnostics(), "Error: /undefined in foo");

    let noise = "é".repeat(DIAGNOSTIC_LIMIT);
    io.write_stderr(noise.as_bytes());
    assert!(io.diagnostics().len() <= DIAGNOSTIC_LIMIT);
    assert!(!io.diagnostics().contains("undefined"));
}

#[test]
fn exit_classification() {
    assert!(InterpreterExit::code(QUIT_CODE).is_quit());
    assert!(!InterpreterExit::code(QUIT_CODE).is_fatal());
    assert!(InterpreterExit::code(-100).is_fatal());
    assert!(!InterpreterExit::code(-1).is_fatal());
}
