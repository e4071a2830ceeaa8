// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Software update catalog documents.
//!
//! A catalog is a plist with a `Products` dictionary. Only the fields needed
//! to locate macOS installers and updates are modeled here.

use {
    crate::{http::fetch_bytes, CatalogError, CatalogResult, SeedProgram},
    log::{debug, info},
    serde::Deserialize,
    std::{
        collections::BTreeMap,
        fmt::{Display, Formatter},
        str::FromStr,
    },
};

/// Value of `InstallAssistantPackageIdentifiers.InstallInfo` for full installers.
pub const INSTALL_INFO_IDENTIFIER: &str = "com.apple.plist.InstallInfo";

/// Value of `InstallAssistantPackageIdentifiers.OSInstall` for full installers.
pub const OS_INSTALL_IDENTIFIER: &str = "com.apple.mpkg.OSInstall";

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstallAssistantPackageIdentifiers {
    pub install_info: Option<String>,
    #[serde(rename = "OSInstall")]
    pub os_install: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExtendedMetaInfo {
    pub install_assistant_package_identifiers: Option<InstallAssistantPackageIdentifiers>,
    pub product_type: Option<String>,
    pub product_version: Option<String>,
}

/// A file belonging to a product.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Package {
    #[serde(rename = "URL")]
    pub url: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
    #[serde(rename = "MetadataURL")]
    pub metadata_url: Option<String>,
}

impl Package {
    /// The last path component of the package URL.
    pub fn file_name(&self) -> &str {
        url_file_name(&self.url)
    }
}

/// The last `/` separated component of a URL.
pub fn url_file_name(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Product {
    #[serde(default)]
    pub distributions: BTreeMap<String, String>,
    #[serde(default)]
    pub packages: Vec<Package>,
    pub extended_meta_info: Option<ExtendedMetaInfo>,
    pub post_date: Option<plist::Date>,
    #[serde(rename = "ServerMetadataURL")]
    pub server_metadata_url: Option<String>,
}

impl Product {
    /// Whether this product is a full macOS install assistant.
    pub fn is_install_assistant(&self) -> bool {
        self.extended_meta_info
            .as_ref()
            .and_then(|x| x.install_assistant_package_identifiers.as_ref())
            .map(|ids| {
                ids.install_info.as_deref() == Some(INSTALL_INFO_IDENTIFIER)
                    && ids.os_install.as_deref() == Some(OS_INSTALL_IDENTIFIER)
            })
            .unwrap_or(false)
    }

    /// Whether this product is a macOS update for the given version.
    pub fn is_macos_update(&self, version: &str) -> bool {
        self.extended_meta_info
            .as_ref()
            .map(|info| {
                info.product_type.as_deref() == Some("macOS")
                    && info.product_version.as_deref() == Some(version)
            })
            .unwrap_or(false)
    }

    pub fn distribution_url(&self, language: &str) -> Option<&str> {
        self.distributions
            .get(language)
            .map(|x| x.as_str())
            .filter(|x| !x.is_empty())
    }

    /// Resolve the packages to download.
    ///
    /// `*` selects every package. Any other value selects the first package
    /// whose file name matches.
    pub fn packages_named(&self, name: &str) -> Vec<&Package> {
        if name == "*" {
            self.packages.iter().collect()
        } else {
            self.packages
                .iter()
                .find(|p| p.file_name() == name)
                .into_iter()
                .collect()
        }
    }

    /// Total size in bytes of the given packages, as advertised by the catalog.
    pub fn total_size<'a>(packages: impl IntoIterator<Item = &'a Package>) -> u64 {
        packages.into_iter().filter_map(|p| p.size).sum()
    }
}

/// Kind of product to search for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProductKind {
    /// A full install assistant.
    Install,
    /// An OS update for a specific version.
    Update,
}

impl FromStr for ProductKind {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "install" => Ok(Self::Install),
            "update" => Ok(Self::Update),
            _ => Err(CatalogError::UnknownProductKind(s.to_string())),
        }
    }
}

impl Display for ProductKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Install => "install",
            Self::Update => "update",
        })
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Catalog {
    pub catalog_version: Option<u64>,
    pub apple_internal: Option<bool>,
    #[serde(default)]
    pub products: BTreeMap<String, Product>,
}

impl Catalog {
    pub fn from_bytes(data: &[u8]) -> CatalogResult<Self> {
        Ok(plist::from_bytes(data)?)
    }

    /// Fetch and parse the catalog of a seed program.
    pub fn fetch(client: &reqwest::blocking::Client, program: SeedProgram) -> CatalogResult<Self> {
        let url = program.catalog_url();
        info!("fetching {} catalog from {}", program, url);

        let catalog = Self::from_bytes(&fetch_bytes(client, &url)?)?;
        debug!("catalog has {} products", catalog.products.len());

        Ok(catalog)
    }

    pub fn product(&self, key: &str) -> Option<&Product> {
        self.products.get(key)
    }

    /// Find the products of a given kind, ordered by product key.
    ///
    /// `version` only applies to [ProductKind::Update].
    pub fn find_products(&self, kind: ProductKind, version: &str) -> Vec<(&str, &Product)> {
        self.products
            .iter()
            .filter(|(_, product)| match kind {
                ProductKind::Install => product.is_install_assistant(),
                ProductKind::Update => product.is_macos_update(version),
            })
            .map(|(key, product)| (key.as_str(), product))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use {super::*, indoc::indoc};

    const CATALOG: &str = indoc! {r#"
        <?xml version="1.0" encoding="UTF-8"?>
        <!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
        <plist version="1.0">
        <dict>
            <key>CatalogVersion</key>
            <integer>2</integer>
            <key>ApplePostURL</key>
            <string>http://swpost.apple.com/stats</string>
            <key>Products</key>
            <dict>
                <key>091-34298</key>
                <dict>
                    <key>Distributions</key>
                    <dict>
                        <key>English</key>
                        <string>https://swdist.apple.com/content/downloads/43/62/091-34298/l6qvn2ylj8s8ph1x3bdokk7x9ql8iwx6se/091-34298.English.dist</string>
                    </dict>
                    <key>ExtendedMetaInfo</key>
                    <dict>
                        <key>InstallAssistantPackageIdentifiers</key>
                        <dict>
                            <key>InstallInfo</key>
                            <string>com.apple.plist.InstallInfo</string>
                            <key>OSInstall</key>
                            <string>com.apple.mpkg.OSInstall</string>
                        </dict>
                    </dict>
                    <key>Packages</key>
                    <array>
                        <dict>
                            <key>Size</key>
                            <integer>1024</integer>
                            <key>URL</key>
                            <string>https://swdist.apple.com/content/downloads/43/62/091-34298/l6qvn2ylj8s8ph1x3bdokk7x9ql8iwx6se/InstallAssistantAuto.pkg</string>
                        </dict>
                        <dict>
                            <key>Digest</key>
                            <string>5c3ba9e8b2b3c10fd0e0c2fd3bcd2c1d5bb8a7b9</string>
                            <key>MetadataURL</key>
                            <string>https://swdist.apple.com/content/downloads/43/62/091-34298/l6qvn2ylj8s8ph1x3bdokk7x9ql8iwx6se/FirmwareUpdate.pkm</string>
                            <key>Size</key>
                            <integer>2048</integer>
                            <key>URL</key>
                            <string>https://swdist.apple.com/content/downloads/43/62/091-34298/l6qvn2ylj8s8ph1x3bdokk7x9ql8iwx6se/FirmwareUpdate.pkg</string>
                        </dict>
                    </array>
                    <key>PostDate</key>
                    <date>2017-09-25T17:15:42Z</date>
                </dict>
                <key>091-40152</key>
                <dict>
                    <key>Distributions</key>
                    <dict>
                        <key>English</key>
                        <string>https://swdist.apple.com/content/downloads/10/53/091-40152/abcdef/091-40152.English.dist</string>
                    </dict>
                    <key>ExtendedMetaInfo</key>
                    <dict>
                        <key>ProductType</key>
                        <string>macOS</string>
                        <key>ProductVersion</key>
                        <string>10.13.1</string>
                    </dict>
                    <key>Packages</key>
                    <array>
                        <dict>
                            <key>Size</key>
                            <integer>4096</integer>
                            <key>URL</key>
                            <string>https://swdist.apple.com/content/downloads/10/53/091-40152/abcdef/macOSUpd10.13.1.pkg</string>
                        </dict>
                    </array>
                </dict>
                <key>zzzz-unrelated</key>
                <dict>
                    <key>Packages</key>
                    <array/>
                </dict>
            </dict>
        </dict>
        </plist>
    "#};

    #[test]
    fn parse_catalog() -> CatalogResult<()> {
        let catalog = Catalog::from_bytes(CATALOG.as_bytes())?;

        assert_eq!(catalog.catalog_version, Some(2));
        assert_eq!(catalog.products.len(), 3);

        let product = catalog.product("091-34298").unwrap();
        assert!(product.post_date.is_some());
        assert_eq!(product.packages.len(), 2);
        assert_eq!(product.packages[1].file_name(), "FirmwareUpdate.pkg");
        assert_eq!(
            product.packages[1].digest.as_deref(),
            Some("5c3ba9e8b2b3c10fd0e0c2fd3bcd2c1d5bb8a7b9")
        );
        assert!(product.packages[0].metadata_url.is_none());
        assert_eq!(
            product.distribution_url("English"),
            Some("https://swdist.apple.com/content/downloads/43/62/091-34298/l6qvn2ylj8s8ph1x3bdokk7x9ql8iwx6se/091-34298.English.dist")
        );
        assert_eq!(product.distribution_url("French"), None);

        Ok(())
    }

    #[test]
    fn find_products() -> CatalogResult<()> {
        let catalog = Catalog::from_bytes(CATALOG.as_bytes())?;

        let installs = catalog.find_products(ProductKind::Install, "10.13");
        assert_eq!(
            installs.iter().map(|(k, _)| *k).collect::<Vec<_>>(),
            vec!["091-34298"]
        );

        let updates = catalog.find_products(ProductKind::Update, "10.13.1");
        assert_eq!(
            updates.iter().map(|(k, _)| *k).collect::<Vec<_>>(),
            vec!["091-40152"]
        );

        assert!(catalog
            .find_products(ProductKind::Update, "10.13.2")
            .is_empty());

        Ok(())
    }

    #[test]
    fn select_packages() -> CatalogResult<()> {
        let catalog = Catalog::from_bytes(CATALOG.as_bytes())?;
        let product = catalog.product("091-34298").unwrap();

        assert_eq!(product.packages_named("*").len(), 2);
        assert_eq!(Product::total_size(product.packages_named("*")), 3072);

        let named = product.packages_named("FirmwareUpdate.pkg");
        assert_eq!(named.len(), 1);
        assert_eq!(named[0].size, Some(2048));

        assert!(product.packages_named("InstallESDDmg.pkg").is_empty());

        Ok(())
    }

    #[test]
    fn product_kinds() {
        assert_eq!("install".parse::<ProductKind>().unwrap(), ProductKind::Install);
        assert_eq!("update".parse::<ProductKind>().unwrap(), ProductKind::Update);
        assert!(matches!(
            "upgrade".parse::<ProductKind>(),
            Err(CatalogError::UnknownProductKind(_))
        ));
        assert_eq!(ProductKind::Update.to_string(), "update");
    }
}
