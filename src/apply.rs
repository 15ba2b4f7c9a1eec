//! Running the caller-supplied apply step.
//!
//! The program is spawned directly with an argument vector; no shell ever
//! sees either path, so metacharacters in them are inert.

use std::path::Path;
use std::process::Command;

use crate::context::Context;

/// Exit status reported when the program could not be run or its status
/// could not be determined (e.g. killed by a signal)
pub const FAILED_TO_RUN: i32 = -1;

/// Run `script` with `artifact` as its only argument and wait for it.
///
/// Returns the child's exit code, or [`FAILED_TO_RUN`].
pub fn apply(script: &Path, artifact: &Path, ctx: &Context) -> i32 {
    ctx.progress(format_args!(
        "Applying update: {} {}",
        script.display(),
        artifact.display()
    ));

    let status = match Command::new(script).arg(artifact).status() {
        Ok(status) => status.code().unwrap_or(FAILED_TO_RUN),
        Err(e) => {
            ctx.error(format_args!("Cannot run {}: {}", script.display(), e));
            FAILED_TO_RUN
        }
    };

    ctx.progress(format_args!(
        "Update {}",
        if status == 0 { "Successful" } else { "Failed" }
    ));
    status
}
