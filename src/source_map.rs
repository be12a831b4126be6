//! Source-map resolution: turns a generated `(script_url, line, column)`
//! into the original `(file, line, column, name)` it was compiled from, when
//! a source map is available. Only inline
//! `data:application/json;base64,...` maps are parsed — a map referenced by
//! a remote `sourceMappingURL` resolves to `None` rather than being fetched,
//! since that would need an HTTP client this engine doesn't otherwise carry.

use std::collections::HashMap;
use std::sync::Mutex;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

const INLINE_MAP_PREFIX: &str = "data:application/json;base64,";

#[derive(Debug, Clone)]
pub struct OriginalLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub name: Option<String>,
}

/// Caches one parsed source map per generated script URL, registered as
/// `Debugger.scriptParsed` events arrive. A script with no map, a remote
/// map, or a malformed map is cached as `None` so later lookups don't retry.
#[derive(Default)]
pub struct SourceMapResolver {
    maps: Mutex<HashMap<String, Option<sourcemap::SourceMap>>>,
}

impl SourceMapResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_script(&self, script_url: &str, source_map_url: Option<&str>) {
        let map = source_map_url.and_then(parse_inline_map);
        self.maps
            .lock()
            .expect("source map cache poisoned")
            .insert(script_url.to_owned(), map);
    }

    /// Resolve one generated call-frame location back to its original file,
    /// line, column, and (if the map carries one) symbol name. `None` when
    /// the script was never registered, carried no map, or the map has no
    /// token covering this location.
    pub fn resolve(&self, script_url: &str, line: u32, column: u32) -> Option<OriginalLocation> {
        let maps = self.maps.lock().expect("source map cache poisoned");
        let map = maps.get(script_url)?.as_ref()?;
        let token = map.lookup_token(line, column)?;
        Some(OriginalLocation {
            file: token.get_source().unwrap_or_default().to_owned(),
            line: token.get_src_line(),
            column: token.get_src_col(),
            name: token.get_name().map(str::to_owned),
        })
    }
}

fn parse_inline_map(source_map_url: &str) -> Option<sourcemap::SourceMap> {
    let payload = source_map_url.strip_prefix(INLINE_MAP_PREFIX)?;
    let bytes = STANDARD.decode(payload).ok()?;
    sourcemap::SourceMap::from_slice(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    // A trivial map: one segment mapping generated (0,0) to original.js:0:0.
    const TINY_MAP: &str = r#"{"version":3,"sources":["original.js"],"names":[],"mappings":"AAAA","file":"out.js"}"#;

    fn inline_url(map_json: &str) -> String {
        format!("{INLINE_MAP_PREFIX}{}", STANDARD.encode(map_json))
    }

    #[test]
    fn resolves_a_registered_inline_map() {
        let resolver = SourceMapResolver::new();
        resolver.register_script("https://x.test/app.js", Some(&inline_url(TINY_MAP)));
        let resolved = resolver.resolve("https://x.test/app.js", 0, 0);
        assert!(resolved.is_some());
        assert_eq!(resolved.unwrap().file, "original.js");
    }

    #[test]
    fn remote_map_url_resolves_to_none() {
        let resolver = SourceMapResolver::new();
        resolver.register_script("https://x.test/app.js", Some("https://x.test/app.js.map"));
        assert!(resolver.resolve("https://x.test/app.js", 0, 0).is_none());
    }

    #[test]
    fn unregistered_script_resolves_to_none() {
        let resolver = SourceMapResolver::new();
        assert!(resolver.resolve("https://x.test/unknown.js", 0, 0).is_none());
    }
}
