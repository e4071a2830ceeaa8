// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Standalone install scripts.
//!
//! A shell script template downloads a specific install assistant given its
//! product key and the `version` and `salt` path components of its download
//! URL. Distribution URLs have the form
//! `https://swdist.apple.com/content/downloads/<a>/<b>/<key>/<salt>/<file>`,
//! with the version being `<a>/<b>`.

use {
    crate::{http::fetch_bytes, CatalogError, CatalogResult},
    log::info,
    reqwest::blocking::Client,
    std::path::Path,
};

pub const TEMPLATE_FILE_NAME: &str = "installScriptTemplate.sh";

pub const TEMPLATE_URL: &str =
    "https://raw.githubusercontent.com/Piker-Alpha/HandyScripts/master/installScriptTemplate.sh";

/// Values substituted into the install script template.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstallScriptParams {
    pub key: String,
    pub version: String,
    pub salt: String,
}

impl InstallScriptParams {
    /// Derive parameters from a product key and its distribution URL.
    pub fn from_distribution_url(key: &str, url: &str) -> CatalogResult<Self> {
        let parts = url.split('/').collect::<Vec<_>>();

        if parts.len() < 9 {
            return Err(CatalogError::MalformedDistributionUrl(url.to_string()));
        }

        Ok(Self {
            key: key.to_string(),
            version: format!("{}/{}", parts[5], parts[6]),
            salt: parts[8].to_string(),
        })
    }

    /// Substitute the `key`, `version` and `salt` placeholders of a template.
    pub fn render(&self, template: &str) -> String {
        template
            .replace("key=\"*\"", &format!("key=\"{}\"", self.key))
            .replace("version=\"*\"", &format!("version=\"{}\"", self.version))
            .replace("salt=\"*\"", &format!("salt=\"{}\"", self.salt))
    }
}

/// File name of the script installing `build`.
pub fn script_file_name(build: &str) -> String {
    format!("installSeed-{}.sh", build)
}

/// Read the template at `path`, downloading it first if it doesn't exist.
pub fn load_template(client: &Client, path: &Path) -> CatalogResult<String> {
    if !path.exists() {
        info!("downloading {} to {}", TEMPLATE_URL, path.display());
        let data = fetch_bytes(client, TEMPLATE_URL)?;
        std::fs::write(path, &data)?;
    }

    Ok(std::fs::read_to_string(path)?)
}

#[cfg(test)]
mod test {
    use {super::*, indoc::indoc};

    const URL: &str = "https://swdist.apple.com/content/downloads/43/62/091-34298/l6qvn2ylj8s8ph1x3bdokk7x9ql8iwx6se/091-34298.English.dist";

    #[test]
    fn params_from_url() -> CatalogResult<()> {
        let params = InstallScriptParams::from_distribution_url("091-34298", URL)?;

        assert_eq!(
            params,
            InstallScriptParams {
                key: "091-34298".into(),
                version: "43/62".into(),
                salt: "l6qvn2ylj8s8ph1x3bdokk7x9ql8iwx6se".into(),
            }
        );

        assert!(matches!(
            InstallScriptParams::from_distribution_url("091-34298", "https://example.com/a/b"),
            Err(CatalogError::MalformedDistributionUrl(_))
        ));

        Ok(())
    }

    #[test]
    fn render_template() -> CatalogResult<()> {
        let template = indoc! {r#"
            #!/bin/bash
            key="*"
            version="*"
            salt="*"
            echo "${version}/${key}/${salt}"
        "#};

        let params = InstallScriptParams::from_distribution_url("091-34298", URL)?;

        assert_eq!(
            params.render(template),
            indoc! {r#"
                #!/bin/bash
                key="091-34298"
                version="43/62"
                salt="l6qvn2ylj8s8ph1x3bdokk7x9ql8iwx6se"
                echo "${version}/${key}/${salt}"
            "#}
        );
        assert_eq!(script_file_name("17B1002"), "installSeed-17B1002.sh");

        Ok(())
    }

    #[test]
    fn existing_template_is_used() -> CatalogResult<()> {
        let td = tempfile::Builder::new()
            .prefix("apple-seed-catalog-")
            .tempdir()?;
        let path = td.path().join(TEMPLATE_FILE_NAME);
        std::fs::write(&path, "key=\"*\"\n")?;

        let client = crate::http::get_http_client()?;
        assert_eq!(load_template(&client, &path)?, "key=\"*\"\n");

        Ok(())
    }
}
