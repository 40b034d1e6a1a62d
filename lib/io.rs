//! Small filesystem helpers for the on-disk cache.

use std::path::Path;

use tokio::io::AsyncWriteExt as _;

/// Remove all files and directories in the given directory, but not the directory itself.
pub async fn remove_dir_contents(path: &Path) -> std::io::Result<()> {
    let mut entries = tokio::fs::read_dir(path).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if tokio::fs::metadata(&path).await?.is_dir() {
            tokio::fs::remove_dir_all(path).await?;
        } else {
            tokio::fs::remove_file(path).await?;
        }
    }
    Ok(())
}

/// Create `path` as an empty file if it does not exist yet. Existing content is kept.
pub async fn touch(path: &Path) -> std::io::Result<()> {
    tokio::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .await
        .map(drop)
}

/// Replace the contents of `path` so that readers observe either the old or the new bytes,
/// never a torn write.
///
/// Writes into a sibling temporary file and renames it over `path`.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = Path::new(&tmp_name);

    let mut file = tokio::fs::File::create(tmp).await?;
    file.write_all(contents).await?;
    file.flush().await?;
    drop(file);

    tokio::fs::rename(tmp, path).await
}
