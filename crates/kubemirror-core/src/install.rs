//! kubeadm package installation (Debian/Ubuntu apt repositories).

use crate::error::{MirrorError, Result};
use crate::exec::{command_line, CommandRunner};
use tracing::info;

/// apt package pin for `version`: `v1.23.6` -> `kubeadm=1.23.6-00`.
pub fn kubeadm_package(version: &str) -> Result<String> {
    let bare = version.strip_prefix('v').unwrap_or(version);
    if bare.is_empty() {
        return Err(MirrorError::MissingVersion);
    }
    Ok(format!("kubeadm={bare}-00"))
}

/// Install the kubeadm build matching `version` with `sudo apt-get`.
pub async fn install_kubeadm(runner: &dyn CommandRunner, version: &str) -> Result<()> {
    let package = kubeadm_package(version)?;
    let args = ["apt-get", "install", "-y", package.as_str()];

    info!(package = %package, "installing kubeadm");
    runner
        .run("sudo", &args)
        .await?
        .into_checked(&command_line("sudo", &args))?;
    info!(package = %package, "kubeadm installed");
    Ok(())
}
