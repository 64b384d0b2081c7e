//! Remote dispatch: ship a finished archive to the remote a target uses.

use crate::config::RemoteConfig;
use crate::transfer::{join_url, parse_url, ChunkedUploader, DEFAULT_CHUNK_SIZE};
use crate::utils::errors::UploadError;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

/// Helper executable used by `copyparty` remotes without a `script`.
pub const DEFAULT_HELPER_SCRIPT: &str = "u2c";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
    /// WebDAV with chunked uploads
    Nextcloud,
    /// Uploaded by an external helper process
    Copyparty,
}

impl fmt::Display for RemoteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nextcloud => write!(f, "nextcloud"),
            Self::Copyparty => write!(f, "copyparty"),
        }
    }
}

/// Upload `local` to `remote` as `file_name` and return where it ended up.
///
/// The local file is left untouched either way.
pub async fn upload(
    name: &str,
    remote: &RemoteConfig,
    local: &Path,
    file_name: &str,
) -> Result<String, UploadError> {
    info!("Sending {} to remote \"{}\" ({})", file_name, name, remote.kind);

    match remote.kind {
        RemoteKind::Nextcloud => {
            let uploader = ChunkedUploader::new(
                &remote.root,
                &remote.user,
                remote.password.as_deref(),
                &remote.dest_dir,
                remote.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
            )?;
            uploader.upload(local, file_name).await
        }
        RemoteKind::Copyparty => run_helper(remote, local, file_name).await,
    }
}

/// Command line of the upload helper: optional `-a <credentials>`, the
/// destination directory URL and the local file.
fn helper_args(remote: &RemoteConfig, local: &Path) -> Result<Vec<String>, UploadError> {
    let mut args = Vec::with_capacity(4);

    if let Some(password) = remote.password.as_deref().filter(|p| !p.is_empty()) {
        args.push("-a".to_string());
        if remote.user.is_empty() {
            args.push(password.to_string());
        } else {
            args.push(format!("{}:{}", remote.user, password));
        }
    }

    args.push(destination_dir(remote)?);
    args.push(local.display().to_string());
    Ok(args)
}

fn destination_dir(remote: &RemoteConfig) -> Result<String, UploadError> {
    Ok(join_url(&parse_url(&remote.root)?, &remote.dest_dir)?.to_string())
}

/// The argument list as it may appear in logs.
fn masked(args: &[String]) -> String {
    let mut shown = Vec::with_capacity(args.len());
    let mut hide_next = false;
    for arg in args {
        if hide_next {
            shown.push("********");
            hide_next = false;
        } else {
            hide_next = arg == "-a";
            shown.push(arg.as_str());
        }
    }
    shown.join(" ")
}

async fn run_helper(
    remote: &RemoteConfig,
    local: &Path,
    file_name: &str,
) -> Result<String, UploadError> {
    let script = remote.script.as_deref().unwrap_or(DEFAULT_HELPER_SCRIPT);
    let args = helper_args(remote, local)?;
    info!("Running {} {}", script, masked(&args));

    let status = Command::new(script)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map_err(|source| UploadError::HelperSpawn {
            script: script.to_string(),
            source,
        })?;

    if !status.success() {
        return Err(UploadError::HelperExit {
            script: script.to_string(),
            status: status.to_string(),
        });
    }

    let location = join_url(&parse_url(&remote.root)?, &remote.dest_dir)?;
    Ok(join_url(&location, file_name)?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::DavServer;
    use tempfile::TempDir;

    fn copyparty(script: &str, user: &str, password: Option<&str>) -> RemoteConfig {
        RemoteConfig {
            kind: RemoteKind::Copyparty,
            root: "https://files.example.com".to_string(),
            user: user.to_string(),
            password: password.map(str::to_string),
            dest_dir: "backups".to_string(),
            script: Some(script.to_string()),
            chunk_size: None,
        }
    }

    #[test]
    fn test_helper_args() {
        let local = Path::new("/tmp/docs.tar");

        let args = helper_args(&copyparty("u2c", "", None), local).unwrap();
        assert_eq!(args, vec!["https://files.example.com/backups", "/tmp/docs.tar"]);

        let args = helper_args(&copyparty("u2c", "", Some("pw")), local).unwrap();
        assert_eq!(args, vec!["-a", "pw", "https://files.example.com/backups", "/tmp/docs.tar"]);

        let args = helper_args(&copyparty("u2c", "alice", Some("pw")), local).unwrap();
        assert_eq!(args[1], "alice:pw");
    }

    #[test]
    fn test_logged_args_hide_password() {
        let args = helper_args(&copyparty("u2c", "alice", Some("pw")), Path::new("/f")).unwrap();
        let shown = masked(&args);
        assert!(!shown.contains("pw"));
        assert_eq!(shown, "-a ******** https://files.example.com/backups /f");
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let parsed: Result<RemoteKind, _> = serde_json::from_str("\"s3\"");
        assert!(parsed.is_err());
        let parsed: RemoteKind = serde_json::from_str("\"copyparty\"").unwrap();
        assert_eq!(parsed, RemoteKind::Copyparty);
    }

    #[tokio::test]
    async fn test_helper_success() {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("docs.tar");
        std::fs::write(&local, b"x").unwrap();

        let location = upload("party", &copyparty("true", "", None), &local, "docs.tar")
            .await
            .unwrap();
        assert_eq!(location, "https://files.example.com/backups/docs.tar");
    }

    #[tokio::test]
    async fn test_helper_failure() {
        let local = Path::new("/nonexistent/docs.tar");

        let err = upload("party", &copyparty("false", "", None), local, "docs.tar")
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::HelperExit { .. }));

        let err = upload(
            "party",
            &copyparty("backup-runner-no-such-helper", "", None),
            local,
            "docs.tar",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, UploadError::HelperSpawn { .. }));
    }

    #[tokio::test]
    async fn test_nextcloud_dispatch() {
        let server = DavServer::start().await;
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("docs.tar");
        std::fs::write(&local, b"archive bytes").unwrap();

        let remote = RemoteConfig {
            kind: RemoteKind::Nextcloud,
            root: server.base_url.clone(),
            user: "alice".to_string(),
            password: Some("pw".to_string()),
            dest_dir: "backups".to_string(),
            script: None,
            chunk_size: Some(4),
        };

        let location = upload("cloud", &remote, &local, "docs.tar").await.unwrap();
        assert_eq!(
            location,
            format!("{}/remote.php/dav/files/alice/backups/docs.tar", server.base_url)
        );
        assert_eq!(
            server.state().files["/remote.php/dav/files/alice/backups/docs.tar"],
            b"archive bytes"
        );
        assert!(local.exists());
    }
}
