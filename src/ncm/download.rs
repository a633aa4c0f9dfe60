use anyhow::Context;
use std::path::{Path, PathBuf};

/// Strip characters that are illegal in filenames on common filesystems.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .collect()
}

/// Save a resolved stream to disk. A side effect triggered explicitly by
/// the user; playback never depends on it.
pub async fn download_audio(
    http: &reqwest::Client,
    url: &str,
    dir: &Path,
    display_name: &str,
) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("create dir {}", dir.display()))?;
    let path = dir.join(format!("{}.mp3", sanitize_filename(display_name)));

    let resp = http
        .get(url)
        .send()
        .await
        .context("request audio")?
        .error_for_status()
        .context("audio http status")?;
    let bytes = resp.bytes().await.context("read audio body")?;
    std::fs::write(&path, &bytes).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a/b\\c:d"), "abcd");
        assert_eq!(sanitize_filename("Song <A>? - Artist*"), "Song A - Artist");
        assert_eq!(sanitize_filename("clean name"), "clean name");
    }
}
