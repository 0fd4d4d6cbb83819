use flate2::read::GzDecoder;
use std::fs::File;
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::{AgentError, Result};

/// 上传的恢复文件
#[derive(Debug, Clone, PartialEq)]
pub enum UploadArtifact {
    /// 上传内容，写入上传目录后使用
    Bytes { file_name: String, content: Vec<u8> },
    /// 已经落盘的文件
    Staged(PathBuf),
}

const ARCHIVE_EXTENSIONS: [&str; 2] = [".tar.gz", ".tgz"];
const SQL_EXTENSIONS: [&str; 2] = [".sql", ".sql.gz"];

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    extensions.iter().any(|ext| name.ends_with(ext))
}

/// 把上传文件放到上传目录，返回可以直接用于恢复的 SQL 文件路径
///
/// 压缩包会被解压到同名目录，取其中第一个 .sql / .sql.gz 文件。
pub async fn stage_upload(staging_dir: &Path, artifact: UploadArtifact) -> Result<PathBuf> {
    let path = match artifact {
        UploadArtifact::Bytes { file_name, content } => {
            // 只取文件名部分，防止路径穿越
            let file_name = Path::new(&file_name)
                .file_name()
                .ok_or_else(|| AgentError::custom(format!("无效的上传文件名: {file_name}")))?
                .to_os_string();
            tokio::fs::create_dir_all(staging_dir).await?;
            let path = staging_dir.join(file_name);
            tokio::fs::write(&path, content).await?;
            debug!("上传文件已保存: {}", path.display());
            path
        }
        UploadArtifact::Staged(path) => path,
    };

    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(AgentError::file_not_found(path.display().to_string()));
    }

    if !has_extension(&path, &ARCHIVE_EXTENSIONS) {
        return Ok(path);
    }

    let sql_file = tokio::task::spawn_blocking(move || extract_sql_file(&path)).await??;
    info!("从上传压缩包中找到恢复文件: {}", sql_file.display());
    Ok(sql_file)
}

fn extract_sql_file(archive_path: &Path) -> Result<PathBuf> {
    let file_name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = ARCHIVE_EXTENSIONS
        .iter()
        .find_map(|ext| {
            file_name
                .to_lowercase()
                .ends_with(ext)
                .then(|| file_name[..file_name.len() - ext.len()].to_string())
        })
        .unwrap_or(file_name);
    let target_dir = archive_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(stem);

    // 同名压缩包再次上传时，清掉上一次解压出的文件
    if target_dir.exists() {
        debug!("清空旧的解压目录: {}", target_dir.display());
        std::fs::remove_dir_all(&target_dir)?;
    }
    std::fs::create_dir_all(&target_dir)?;
    let decoder = GzDecoder::new(File::open(archive_path)?);
    let mut archive = Archive::new(decoder);
    archive
        .unpack(&target_dir)
        .map_err(|e| AgentError::operation(format!("解压上传文件失败: {e}")))?;

    let mut candidates = Vec::new();
    for entry in WalkDir::new(&target_dir).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() && has_extension(entry.path(), &SQL_EXTENSIONS) {
            candidates.push(entry.into_path());
        }
    }

    candidates.into_iter().next().ok_or_else(|| {
        AgentError::file_not_found(format!(
            "{} 中没有 .sql 或 .sql.gz 文件",
            archive_path.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tempfile::tempdir;

    fn write_archive(path: &Path, entries: &[(&str, &[u8])]) {
        let encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *content).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    fn archive_upload(entries: &[(&str, &[u8])]) -> UploadArtifact {
        let scratch = tempdir().unwrap();
        let archive = scratch.path().join("app_db.tar.gz");
        write_archive(&archive, entries);
        UploadArtifact::Bytes {
            file_name: "app_db.tar.gz".to_string(),
            content: std::fs::read(&archive).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_plain_upload_is_written_and_used_directly() {
        let dir = tempdir().unwrap();
        let staged = stage_upload(
            dir.path(),
            UploadArtifact::Bytes {
                file_name: "../../etc/app_db.sql.gz".to_string(),
                content: b"-- dump".to_vec(),
            },
        )
        .await
        .unwrap();

        assert_eq!(staged, dir.path().join("app_db.sql.gz"));
        assert_eq!(std::fs::read(&staged).unwrap(), b"-- dump");
    }

    #[tokio::test]
    async fn test_archive_upload_uses_first_sql_file() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("app_db.tar.gz");
        write_archive(
            &archive,
            &[
                ("README.txt", b"notes"),
                ("dump/b.sql", b"-- b"),
                ("dump/a.sql", b"-- a"),
            ],
        );

        let staged = stage_upload(dir.path(), UploadArtifact::Staged(archive))
            .await
            .unwrap();

        assert_eq!(staged, dir.path().join("app_db").join("dump").join("a.sql"));
    }

    #[tokio::test]
    async fn test_reuploaded_archive_replaces_previous_extraction() {
        let dir = tempdir().unwrap();

        let first = stage_upload(dir.path(), archive_upload(&[("a_old.sql", b"-- old")]))
            .await
            .unwrap();
        assert_eq!(first, dir.path().join("app_db").join("a_old.sql"));

        let second = stage_upload(dir.path(), archive_upload(&[("b_new.sql", b"-- new")]))
            .await
            .unwrap();
        assert_eq!(second, dir.path().join("app_db").join("b_new.sql"));
        assert_eq!(std::fs::read(&second).unwrap(), b"-- new");
        assert!(!dir.path().join("app_db").join("a_old.sql").exists());
    }

    #[tokio::test]
    async fn test_archive_without_sql_is_rejected() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("empty.tgz");
        write_archive(&archive, &[("README.txt", b"notes")]);

        let result = stage_upload(dir.path(), UploadArtifact::Staged(archive)).await;
        assert!(matches!(result, Err(AgentError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_missing_staged_file() {
        let dir = tempdir().unwrap();
        let result = stage_upload(
            dir.path(),
            UploadArtifact::Staged(dir.path().join("missing.sql")),
        )
        .await;
        assert!(matches!(result, Err(AgentError::FileNotFound(_))));
    }
}
