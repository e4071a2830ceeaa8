// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP primitives.

use {
    crate::{CatalogError, CatalogResult},
    log::{debug, warn},
    reqwest::blocking::{Client, ClientBuilder, Response},
    std::{
        io::{Read, Write},
        path::Path,
        time::Duration,
    },
    url::Url,
};

const USER_AGENT: &str = "apple-seed-catalog crate (https://crates.io/crates/apple-seed-catalog)";

const CHUNK_SIZE: usize = 4096;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Describes a download in progress.
#[derive(Clone, Debug)]
pub enum DownloadEvent {
    /// A download started. Has the destination file name and the advertised length.
    Start(String, Option<u64>),
    /// Cumulative bytes written so far.
    Progress(u64),
    /// The download finished with the given number of bytes.
    Finish(u64),
}

/// Scheme a proxy environment variable applies to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ProxyScheme {
    Http,
    Https,
    All,
}

/// Proxies configured by `http_proxy`, `https_proxy` and `all_proxy`.
///
/// Variable names are case insensitive. Values that aren't URLs are skipped.
fn env_proxies(vars: impl Iterator<Item = (String, String)>) -> Vec<(ProxyScheme, Url)> {
    vars.filter_map(|(key, value)| {
        let name = key.to_lowercase();

        let scheme = match name.strip_suffix("_proxy")? {
            "http" => ProxyScheme::Http,
            "https" => ProxyScheme::Https,
            "all" => ProxyScheme::All,
            _ => return None,
        };

        match Url::parse(&value) {
            Ok(url) => Some((scheme, url)),
            Err(e) => {
                warn!("ignoring {}: {}", key, e);
                None
            }
        }
    })
    .collect()
}

/// Obtain an HTTP client for talking to Apple's servers.
///
/// Proxy environment variables are honored. Connection attempts time out
/// after [CONNECT_TIMEOUT].
pub fn get_http_client() -> reqwest::Result<Client> {
    let mut builder = ClientBuilder::new()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT);

    for (scheme, url) in env_proxies(std::env::vars()) {
        let proxy = match scheme {
            ProxyScheme::Http => reqwest::Proxy::http(url.as_str()),
            ProxyScheme::Https => reqwest::Proxy::https(url.as_str()),
            ProxyScheme::All => reqwest::Proxy::all(url.as_str()),
        };

        match proxy {
            Ok(proxy) => {
                debug!("using {:?} proxy {}", scheme, url);
                builder = builder.proxy(proxy);
            }
            Err(e) => warn!("unusable proxy {}: {}", url, e),
        }
    }

    builder.build()
}

fn get(client: &Client, url: &str) -> CatalogResult<Response> {
    let url = Url::parse(url)?;
    debug!("GET {}", url);

    let response = client.get(url.clone()).send()?;

    if response.status().is_success() {
        Ok(response)
    } else {
        Err(CatalogError::HttpStatus(
            url.to_string(),
            response.status().as_u16(),
        ))
    }
}

/// Fetch the content of a URL.
pub fn fetch_bytes(client: &Client, url: &str) -> CatalogResult<Vec<u8>> {
    let mut response = get(client, url)?;

    let mut data = vec![];
    response.read_to_end(&mut data)?;

    Ok(data)
}

/// Download a URL to a file.
///
/// An existing file at `dest` is replaced. Returns the number of bytes written.
pub fn download_to_path(
    client: &Client,
    url: &str,
    dest: &Path,
    progress: &mut dyn FnMut(DownloadEvent),
) -> CatalogResult<u64> {
    let mut response = get(client, url)?;

    let file_name = dest
        .file_name()
        .map(|x| x.to_string_lossy().to_string())
        .unwrap_or_default();

    if dest.exists() {
        warn!("replacing existing {}", dest.display());
        std::fs::remove_file(dest)?;
    }

    progress(DownloadEvent::Start(file_name, response.content_length()));

    let mut fh = std::fs::File::create(dest)?;
    let written = copy_with_progress(&mut response, &mut fh, progress)?;

    progress(DownloadEvent::Finish(written));

    Ok(written)
}

fn copy_with_progress(
    reader: &mut impl Read,
    writer: &mut impl Write,
    progress: &mut dyn FnMut(DownloadEvent),
) -> std::io::Result<u64> {
    let mut buffer = [0u8; CHUNK_SIZE];
    let mut written = 0u64;

    loop {
        let count = reader.read(&mut buffer)?;
        if count == 0 {
            break;
        }

        writer.write_all(&buffer[..count])?;
        written += count as u64;
        progress(DownloadEvent::Progress(written));
    }

    writer.flush()?;

    Ok(written)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn copy_reports_progress() -> std::io::Result<()> {
        let data = vec![0x42u8; CHUNK_SIZE * 2 + 10];
        let mut out = vec![];
        let mut events = vec![];

        let written = copy_with_progress(&mut data.as_slice(), &mut out, &mut |event| {
            if let DownloadEvent::Progress(n) = event {
                events.push(n);
            }
        })?;

        assert_eq!(written, data.len() as u64);
        assert_eq!(out, data);
        assert_eq!(events.last().copied(), Some(data.len() as u64));
        assert!(events.windows(2).all(|w| w[0] < w[1]));

        Ok(())
    }

    #[test]
    fn proxies_from_environment() {
        let vars = [
            ("HTTPS_PROXY", "http://proxy.example.com:3128"),
            ("http_proxy", "http://127.0.0.1:8080"),
            ("all_proxy", "http://127.0.0.1:1080"),
            ("no_proxy", "localhost"),
            ("ftp_proxy", "http://127.0.0.1:21"),
            ("HTTP_PROXY_USER", "nobody"),
            ("https_proxy", "not a url"),
            ("PATH", "/usr/bin"),
        ];

        let proxies = env_proxies(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        );

        assert_eq!(
            proxies
                .iter()
                .map(|(scheme, url)| (*scheme, url.as_str()))
                .collect::<Vec<_>>(),
            vec![
                (ProxyScheme::Https, "http://proxy.example.com:3128/"),
                (ProxyScheme::Http, "http://127.0.0.1:8080/"),
                (ProxyScheme::All, "http://127.0.0.1:1080/"),
            ]
        );
    }

    #[test]
    fn client_construction() {
        assert!(get_http_client().is_ok());
    }

    #[test]
    fn bad_url() {
        let client = get_http_client().unwrap();
        assert!(matches!(
            fetch_bytes(&client, "not a url"),
            Err(CatalogError::Url(_))
        ));
    }
}
