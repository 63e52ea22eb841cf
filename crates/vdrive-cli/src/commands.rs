//! Subcommand implementations.

use anyhow::{Context, Result, bail};
use chrono::{TimeZone, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;

use vdrive_kernel::copy::{self, TransferMode, copy_with_ctx, open_content_reader};
use vdrive_kernel::drive::{Drive, DriveRegistry, Entry};
use vdrive_kernel::path::clean_path;
use vdrive_kernel::task::{TaskContext, dummy_context};

/// One listing line: type, size, modification time, name.
pub fn format_entry(entry: &dyn Entry) -> String {
    let kind = if entry.entry_type().is_dir() { 'd' } else { '-' };
    let size = if entry.entry_type().is_dir() {
        "-".to_string()
    } else {
        entry.size().to_string()
    };
    let modified = Utc
        .timestamp_millis_opt(entry.mod_time())
        .single()
        .filter(|_| entry.mod_time() > 0)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    let suffix = if entry.entry_type().is_dir() { "/" } else { "" };
    format!("{kind} {size:>12} {modified:>16} {}{suffix}", entry.name())
}

pub async fn ls(registry: &DriveRegistry, path: &str) -> Result<()> {
    if clean_path(path) == "/" {
        for mount in registry.list_mounts().await {
            let mode = if mount.can_write { "rw" } else { "ro" };
            println!("{mode} /{}", mount.name);
        }
        return Ok(());
    }
    let (drive, inner) = registry.resolve(path).await?;
    for entry in drive.list(&inner).await? {
        println!("{}", format_entry(entry.as_ref()));
    }
    Ok(())
}

pub async fn stat(registry: &DriveRegistry, path: &str) -> Result<()> {
    let (drive, inner) = registry.resolve(path).await?;
    let entry = drive.get(&inner).await?;
    let meta = entry.meta();
    println!("{}", format_entry(entry.as_ref()));
    println!("path:     {}", entry.path());
    println!("readable: {}", meta.can_read);
    println!("writable: {}", meta.can_write);
    Ok(())
}

pub async fn mkdir(registry: &DriveRegistry, path: &str) -> Result<()> {
    let (drive, inner) = registry.resolve(path).await?;
    drive.make_dir(&inner).await?;
    Ok(())
}

pub async fn rm(registry: &DriveRegistry, path: &str) -> Result<()> {
    let (drive, inner) = registry.resolve(path).await?;
    drive.delete(&inner, dummy_context()).await?;
    Ok(())
}

/// Cancel `ctx` on Ctrl-C and trace its progress once a second.
fn watch(ctx: Arc<TaskContext>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    if res.is_ok() {
                        tracing::warn!("interrupted, canceling");
                        ctx.cancel();
                    }
                    return;
                }
                _ = tick.tick() => {
                    let p = ctx.snapshot();
                    tracing::trace!(loaded = p.loaded, total = p.total, "progress");
                }
            }
        }
    })
}

pub async fn transfer(
    registry: &DriveRegistry,
    src: &str,
    dst: &str,
    force: bool,
    mode: TransferMode,
    temp_dir: &Path,
) -> Result<()> {
    let (src_drive, src_path) = registry.resolve(src).await?;
    let (dst_drive, dst_path) = registry.resolve(dst).await?;
    let entry = src_drive.get(&src_path).await?;

    let ctx = Arc::new(TaskContext::new());
    let watcher = watch(ctx.clone());
    let result = copy::transfer(
        entry,
        dst_drive.as_ref(),
        &dst_path,
        force,
        mode,
        ctx.as_ref(),
        temp_dir,
    )
    .await;
    watcher.abort();
    result?;

    let p = ctx.snapshot();
    tracing::info!(from = src, to = dst, bytes = p.loaded, ?mode, "transfer complete");
    Ok(())
}

pub async fn get(registry: &DriveRegistry, path: &str, local: Option<&Path>) -> Result<()> {
    let (drive, inner) = registry.resolve(path).await?;
    let entry = drive.get(&inner).await?;
    let Some(content) = entry.content() else {
        bail!("'{path}' is not a file");
    };
    let mut reader = open_content_reader(content).await?;

    let ctx = Arc::new(TaskContext::new());
    let watcher = watch(ctx.clone());
    let result = match local {
        Some(local) => {
            let mut file = tokio::fs::File::create(local)
                .await
                .with_context(|| format!("cannot create {}", local.display()))?;
            let copied = copy_with_ctx(&mut file, &mut reader, ctx.as_ref()).await;
            file.flush().await?;
            copied
        }
        None => {
            let mut out = tokio::io::stdout();
            let copied = copy_with_ctx(&mut out, &mut reader, ctx.as_ref()).await;
            out.flush().await?;
            copied
        }
    };
    watcher.abort();
    result?;
    Ok(())
}

pub async fn put(registry: &DriveRegistry, local: &Path, path: &str, force: bool) -> Result<()> {
    let (drive, inner) = registry.resolve(path).await?;
    let file = tokio::fs::File::open(local)
        .await
        .with_context(|| format!("cannot open {}", local.display()))?;
    let size = file.metadata().await?.len() as i64;

    let ctx = Arc::new(TaskContext::new());
    let watcher = watch(ctx.clone());
    let result = drive
        .save(&inner, size, force, Box::new(file), ctx.as_ref())
        .await;
    watcher.abort();
    let entry = result?;
    tracing::info!(path = %entry.path(), size = entry.size(), "uploaded");
    Ok(())
}
