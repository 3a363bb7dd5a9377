//! Post-install import check.
//!
//! Distribution names and import names often differ. The probe maps one to
//! the other and asks the same interpreter the installer used to import the
//! module. A negative answer is advisory only.

use crate::process::{self, ProcessSpec};
use std::path::PathBuf;
use std::time::Duration;
use warden_types::PackageName;

pub const DEFAULT_VERIFY_TIMEOUT_SECS: u64 = 30;

/// Distribution name to import name, where they differ.
const IMPORT_NAMES: &[(&str, &str)] = &[
    ("scikit-learn", "sklearn"),
    ("pillow", "PIL"),
    ("opencv-python", "cv2"),
    ("beautifulsoup4", "bs4"),
    ("pyyaml", "yaml"),
    ("python-dateutil", "dateutil"),
    ("msgpack-python", "msgpack"),
    ("pytorch", "torch"),
    ("protobuf", "google.protobuf"),
];

/// Module name to import for an installed distribution.
pub fn import_name(package: &PackageName) -> String {
    let key = package.key();
    IMPORT_NAMES
        .iter()
        .find(|(distribution, _)| *distribution == key)
        .map(|(_, module)| module.to_string())
        .unwrap_or_else(|| package.as_str().replace('-', "_"))
}

/// Runs `<interpreter> -c "import <module>"`.
#[derive(Debug, Clone)]
pub struct VerificationProbe {
    interpreter: PathBuf,
    timeout: Duration,
}

impl VerificationProbe {
    pub fn new(interpreter: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
        }
    }

    pub async fn verify(&self, package: &PackageName) -> bool {
        let module = import_name(package);
        let spec = ProcessSpec::new(&self.interpreter, self.timeout)
            .arg("-c")
            .arg(format!("import {}", module));

        match process::run(&spec).await {
            Ok(output) if output.success => {
                tracing::info!(package = %package, module = %module, "Import verification passed");
                true
            }
            Ok(output) => {
                tracing::warn!(
                    package = %package,
                    module = %module,
                    stderr = %output.stderr.trim(),
                    "Import verification failed"
                );
                false
            }
            Err(e) => {
                tracing::warn!(package = %package, module = %module, error = %e, "Import probe did not run");
                false
            }
        }
    }
}
