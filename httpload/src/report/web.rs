use std::path::Path;

use rama::{
    error::{BoxError, ErrorContext as _},
    telemetry::tracing,
};

/// Platform program (and leading arguments) that opens a file
/// with the user's default application.
fn opener() -> (&'static str, &'static [&'static str]) {
    #[cfg(target_os = "macos")]
    {
        ("open", &[])
    }
    #[cfg(target_os = "windows")]
    {
        ("cmd", &["/C", "start"])
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        ("xdg-open", &[])
    }
}

/// Shell command a user can run to open the report.
pub fn open_command(path: &Path) -> String {
    let (program, args) = opener();
    let mut cmd = program.to_owned();
    for arg in args {
        cmd.push(' ');
        cmd.push_str(arg);
    }
    cmd.push(' ');
    cmd.push_str(&path.display().to_string());
    cmd
}

pub async fn open_in_browser(path: &Path) -> Result<(), BoxError> {
    let (program, args) = opener();
    let status = tokio::process::Command::new(program)
        .args(args)
        .arg(path)
        .status()
        .await
        .context("run browser opener")
        .with_context_field("program", || program)?;

    if !status.success() {
        return Err(BoxError::from(format!(
            "browser opener '{program}' exited with {status}"
        )));
    }

    tracing::debug!(path = %path.display(), "report opened in browser");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_ends_with_report_path() {
        let cmd = open_command(Path::new("report.json"));
        assert!(cmd.ends_with(" report.json"), "{cmd}");
        assert!(cmd.starts_with(opener().0), "{cmd}");
    }
}
