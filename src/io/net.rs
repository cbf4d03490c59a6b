use crate::{
    error::{Result, UnmixError},
    io::progress::emit_download_progress,
};
use reqwest::blocking::Client;
use std::{
    fs::{self, File},
    io::{BufWriter, Read, Write},
    path::Path,
    time::Duration,
};
use tracing::{debug, warn};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound for a whole blob transfer; the largest music weights are a few hundred MB.
pub const TOTAL_TIMEOUT: Duration = Duration::from_secs(60 * 60);

const CHUNK: usize = 64 * 1024;

pub fn http_client() -> Result<Client> {
    Ok(Client::builder()
        .user_agent(concat!("unmix-core/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(TOTAL_TIMEOUT)
        .build()?)
}

/// Stream `url` into `dest`.
///
/// Bytes land in `<dest>.part` first; `dest` is only replaced once the body is
/// complete (and matches `Content-Length` when the server sent one). A failed
/// transfer leaves no partial file behind.
pub fn download_with_progress(client: &Client, url: &str, dest: &Path) -> Result<()> {
    let part = dest.with_extension("part");
    let result = fetch_into(client, url, &part);
    if result.is_err() && part.exists() {
        fs::remove_file(&part).ok();
    }
    let received = result?;

    if dest.exists() {
        fs::remove_file(dest)?;
    }
    fs::rename(&part, dest)?;
    debug!(url, bytes = received, dest = %dest.display(), "download complete");
    Ok(())
}

fn fetch_into(client: &Client, url: &str, part: &Path) -> Result<u64> {
    let mut resp = client.get(url).send()?.error_for_status()?;
    let expected = resp.content_length();
    let total = expected.unwrap_or(0);
    debug!(url, total, "downloading");
    emit_download_progress(0, total);

    let mut out = BufWriter::new(File::create(part)?);
    let mut received: u64 = 0;
    let mut buf = vec![0u8; CHUNK];
    loop {
        let n = resp.read(&mut buf)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
        received += n as u64;
        emit_download_progress(received, total);
    }
    out.flush()?;

    if let Some(expected) = expected {
        if received != expected {
            warn!(url, expected, received, "transfer ended early");
            return Err(UnmixError::Weights(format!(
                "download of {url} truncated: {received} of {expected} bytes"
            )));
        }
    }
    emit_download_progress(received, received);
    Ok(received)
}
