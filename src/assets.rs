//! In-memory static asset bundle addressed under the virtual `/web` root.

use crate::errors::{Error, Result};
use bytes::Bytes;
use std::{collections::HashMap, fs, path::Path};
use tracing::{debug, info};

/// Read-only map from virtual path (`/web/clean/favicon.ico`) to contents.
///
/// Loaded once at startup and shared by every connection behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct AssetStore {
    files: HashMap<String, Bytes>,
}

impl AssetStore {
    /// Virtual root every asset path starts with.
    pub const ROOT: &'static str = "/web";

    /// Reads every file under `dir`, recursively.
    ///
    /// `dir/clean/script.js` becomes `/web/clean/script.js`.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let mut files = HashMap::new();
        Self::load_recursive(dir, Self::ROOT, &mut files)?;

        info!(root = %dir.display(), assets = files.len(), "asset bundle loaded");
        Ok(Self { files })
    }

    fn load_recursive(dir: &Path, virtual_dir: &str, files: &mut HashMap<String, Bytes>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let virtual_path = format!("{virtual_dir}/{name}");

            if file_type.is_dir() {
                Self::load_recursive(&entry.path(), &virtual_path, files)?;
            } else if file_type.is_file() {
                let data = fs::read(entry.path())?;
                debug!(path = %virtual_path, size = data.len(), "asset");
                files.insert(virtual_path, Bytes::from(data));
            }
        }

        Ok(())
    }

    /// Builds a store from `(virtual path, contents)` pairs.
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Bytes>,
    {
        Self {
            files: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Contents of `path`, or [`Error::AssetNotFound`].
    pub fn get(&self, path: &str) -> Result<Bytes> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| Error::AssetNotFound(path.to_string()))
    }

    /// Whether `path` is in the bundle.
    #[inline]
    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Number of bundled files.
    #[inline]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the bundle holds no files.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// `Content-Type` for an asset path, by extension. Unknown extensions are
/// served as `text/html`.
pub fn content_type(path: &str) -> &'static str {
    #[rustfmt::skip]
    const TABLE: [(&str, &str); 6] = [
        (".js",    "text/javascript"),
        (".css",   "text/css"),
        (".webp",  "image/webp"),
        (".png",   "image/png"),
        (".ico",   "image/x-icon"),
        (".woff2", "font/woff2"),
    ];

    TABLE
        .iter()
        .find(|(ext, _)| path.ends_with(ext))
        .map_or("text/html", |&(_, mime)| mime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types() {
        #[rustfmt::skip]
        let cases = [
            ("/web/clean/script.js",     "text/javascript"),
            ("/web/clean/style.css",     "text/css"),
            ("/web/a/photo.webp",        "image/webp"),
            ("/web/a/logo.png",          "image/png"),
            ("/web/clean/favicon.ico",   "image/x-icon"),
            ("/web/fonts/font.woff2",    "font/woff2"),
            ("/web/clean/index.html",    "text/html"),
            ("/web/clean/data.json",     "text/html"),
            ("/web/clean/noext",         "text/html"),
            ("/web/clean/app.js?v=2",    "text/html"),
        ];

        for (path, expected) in cases {
            assert_eq!(content_type(path), expected, "{path}");
        }
    }

    #[test]
    fn from_entries() {
        let store = AssetStore::from_entries([("/web/clean/a.css", "body{}")]);

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("/web/clean/a.css").unwrap(), Bytes::from_static(b"body{}"));
        assert!(matches!(
            store.get("/web/clean/b.css"),
            Err(Error::AssetNotFound(path)) if path == "/web/clean/b.css"
        ));
    }

    #[test]
    fn load_dir() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("clean/fonts")).unwrap();
        fs::write(root.path().join("top.html"), "<p>top</p>").unwrap();
        fs::write(root.path().join("clean/index_frag1.html"), "<p>1</p>").unwrap();
        fs::write(root.path().join("clean/fonts/x.woff2"), [0u8, 1, 2]).unwrap();

        let store = AssetStore::load_dir(root.path()).unwrap();

        assert_eq!(store.len(), 3);
        assert!(store.contains("/web/top.html"));
        assert_eq!(store.get("/web/clean/index_frag1.html").unwrap(), "<p>1</p>");
        assert_eq!(store.get("/web/clean/fonts/x.woff2").unwrap().len(), 3);
    }

    #[test]
    fn load_missing_dir() {
        let root = tempfile::tempdir().unwrap();
        let result = AssetStore::load_dir(root.path().join("absent"));
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn shipped_bundle() {
        let store = AssetStore::load_dir(concat!(env!("CARGO_MANIFEST_DIR"), "/web")).unwrap();

        #[rustfmt::skip]
        let required = [
            "/web/Eliminating-Roundtrips-with-Preconnect_igvita.com_frag1.html",
            "/web/Eliminating-Roundtrips-with-Preconnect_igvita.com_frag2.html",
            "/web/clean/index_frag1.html",
            "/web/clean/index_frag2.html",
            "/web/clean/favicon.ico",
        ];

        for path in required {
            assert!(!store.get(path).unwrap().is_empty(), "{path}");
        }

        // ICONDIR header: reserved 0, type 1 (icon), at least one image.
        let icon = store.get("/web/clean/favicon.ico").unwrap();
        assert_eq!(&icon[..4], &[0, 0, 1, 0]);
        assert_ne!(u16::from_le_bytes([icon[4], icon[5]]), 0);
    }
}
