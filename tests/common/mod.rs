use assert_cmd::Command;

pub fn chartpilot_bin() -> Command {
    #[allow(deprecated)]
    {
        Command::cargo_bin("chartpilot").expect("chartpilot test binary should build")
    }
}
