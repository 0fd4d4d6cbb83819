use async_trait::async_trait;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{BackupInfo, DatabaseClient, DatabaseClientFactory, RecoverInfo};
use crate::config::PostgresqlInstance;
use crate::{AgentError, Result};

/// 基于本机 `pg_dump` / `psql` 命令的客户端工厂
#[derive(Debug, Clone)]
pub struct PgCommandClientFactory {
    instances: Vec<PostgresqlInstance>,
}

impl PgCommandClientFactory {
    pub fn new(instances: Vec<PostgresqlInstance>) -> Self {
        Self { instances }
    }
}

#[async_trait]
impl DatabaseClientFactory for PgCommandClientFactory {
    async fn connect(&self, instance: &str) -> Result<Box<dyn DatabaseClient>> {
        let config = self
            .instances
            .iter()
            .find(|i| i.name == instance)
            .cloned()
            .ok_or_else(|| AgentError::not_found(format!("PostgreSQL 实例 {instance}")))?;

        let pg_dump = which::which("pg_dump")
            .map_err(|e| AgentError::operation(format!("未找到 pg_dump 命令: {e}")))?;
        let psql = which::which("psql")
            .map_err(|e| AgentError::operation(format!("未找到 psql 命令: {e}")))?;

        Ok(Box::new(PgCommandClient {
            instance: config,
            pg_dump,
            psql,
        }))
    }
}

/// 通过命令行工具访问单个 PostgreSQL 实例
#[derive(Debug, Clone)]
pub struct PgCommandClient {
    instance: PostgresqlInstance,
    pg_dump: PathBuf,
    psql: PathBuf,
}

impl PgCommandClient {
    fn command(&self, program: &Path, username: &str) -> Command {
        let mut cmd = Command::new(program);
        cmd.arg("-h")
            .arg(&self.instance.host)
            .arg("-p")
            .arg(self.instance.port.to_string())
            .arg("-U")
            .arg(username)
            .env("PGPASSWORD", &self.instance.password)
            .kill_on_drop(true);
        cmd
    }

    async fn bounded<F>(what: &str, timeout: Duration, fut: F) -> Result<Output>
    where
        F: std::future::Future<Output = std::io::Result<Output>>,
    {
        let output = tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| AgentError::timeout(what, timeout))??;

        if !output.status.success() {
            return Err(AgentError::operation(format!(
                "{what} 退出码 {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output)
    }
}

#[async_trait]
impl DatabaseClient for PgCommandClient {
    async fn backup(&self, info: &BackupInfo) -> Result<()> {
        tokio::fs::create_dir_all(&info.target_dir).await?;

        let mut cmd = self.command(&self.pg_dump, &self.instance.username);
        cmd.arg("--clean")
            .arg("--if-exists")
            .arg("--no-owner")
            .arg(&info.name);

        debug!("执行 pg_dump 备份数据库 {}", info.name);
        Self::bounded(
            "pg_dump",
            info.timeout,
            dump_to_file(cmd, info.target_path()),
        )
        .await?;

        info!(
            "PostgreSQL 数据库 {} 备份完成: {}",
            info.name,
            info.target_path().display()
        );
        Ok(())
    }

    async fn recover(&self, info: &RecoverInfo) -> Result<()> {
        // 先完整解压，损坏的压缩包不会让 psql 执行半截 SQL
        let source = info.source_file.clone();
        let sql = tokio::task::spawn_blocking(move || {
            let mut file = std::fs::File::open(&source)?;
            let mut content = Vec::new();
            if source.to_string_lossy().ends_with(".gz") {
                GzDecoder::new(file).read_to_end(&mut content)?;
            } else {
                file.read_to_end(&mut content)?;
            }
            Ok::<Vec<u8>, AgentError>(content)
        })
        .await??;

        let username = info
            .username
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(&self.instance.username);
        let mut cmd = self.command(&self.psql, username);
        cmd.arg("-d").arg(&info.name).arg("-v").arg("ON_ERROR_STOP=1");

        debug!(
            "执行 psql 恢复数据库 {} <- {}",
            info.name,
            info.source_file.display()
        );
        Self::bounded("psql", info.timeout, feed_stdin(cmd, sql)).await?;

        info!("PostgreSQL 数据库 {} 恢复完成", info.name);
        Ok(())
    }

    fn close(&self) {
        debug!("关闭 PostgreSQL 实例 {} 的客户端", self.instance.name);
    }
}

const CHUNK_SIZE: usize = 64 * 1024;
const CHUNK_QUEUE_DEPTH: usize = 16;

/// 运行命令并把标准输出写入 `target`，以 `.gz` 结尾时边读边压缩
///
/// 标准错误和标准输出同时读取，子进程不会因为管道写满而阻塞。
async fn dump_to_file(mut cmd: Command, target: PathBuf) -> io::Result<Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn()?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("无法获取子进程标准输出"))?;

    let (tx, rx) = mpsc::channel::<Vec<u8>>(CHUNK_QUEUE_DEPTH);
    let writer = tokio::task::spawn_blocking(move || write_chunks(&target, rx));

    let pump = async move {
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = stdout.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            // 写入端已退出，丢弃 stdout 让子进程收到 EPIPE
            if tx.send(buf[..n].to_vec()).await.is_err() {
                break;
            }
        }
        Ok::<(), io::Error>(())
    };

    let (pumped, output) = tokio::join!(pump, child.wait_with_output());
    let output = output?;
    let written = writer.await.map_err(io::Error::other)?;
    if output.status.success() {
        pumped?;
        written?;
    }
    Ok(output)
}

fn write_chunks(target: &Path, mut rx: mpsc::Receiver<Vec<u8>>) -> io::Result<()> {
    let file = BufWriter::new(File::create(target)?);
    if target.to_string_lossy().ends_with(".gz") {
        let mut encoder = GzEncoder::new(file, Compression::default());
        while let Some(chunk) = rx.blocking_recv() {
            encoder.write_all(&chunk)?;
        }
        encoder.finish()?.flush()
    } else {
        let mut file = file;
        while let Some(chunk) = rx.blocking_recv() {
            file.write_all(&chunk)?;
        }
        file.flush()
    }
}

/// 把 `input` 写入命令的标准输入，同时收集标准错误
async fn feed_stdin(mut cmd: Command, input: Vec<u8>) -> io::Result<Output> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn()?;
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| io::Error::other("无法获取子进程标准输入"))?;

    let feed = async move {
        stdin.write_all(&input).await?;
        stdin.shutdown().await
    };

    let (fed, output) = tokio::join!(feed, child.wait_with_output());
    let output = output?;
    // 子进程提前退出时写入会报 BrokenPipe，以退出码为准
    if output.status.success() {
        fed?;
    }
    Ok(output)
}
