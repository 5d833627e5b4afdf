//! Modules importable from sandboxed code.
//!
//! Each module is CommonJS-style source evaluated with `module`, `exports`
//! and `require` in scope. Registration only makes a module *loadable*;
//! whether sandboxed code may import it is decided by the
//! [`ModulePolicy`](crate::ModulePolicy).

use crate::error::ImportDenied;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Largest module file accepted from a module directory (1 MB).
const MAX_MODULE_SIZE: u64 = 1024 * 1024;

const RANDOM: &str = r#"
exports.random = function () { return Math.random(); };
exports.randint = function (low, high) {
    return low + Math.floor(Math.random() * (high - low + 1));
};
exports.choice = function (seq) {
    if (seq.length === 0) { throw new RangeError('cannot choose from an empty sequence'); }
    return seq[Math.floor(Math.random() * seq.length)];
};
exports.shuffle = function (items) {
    for (let i = items.length - 1; i > 0; i--) {
        const j = Math.floor(Math.random() * (i + 1));
        const tmp = items[i];
        items[i] = items[j];
        items[j] = tmp;
    }
    return items;
};
exports.sample = function (seq, k) {
    if (k > seq.length) { throw new RangeError('sample larger than population'); }
    return exports.shuffle(Array.from(seq)).slice(0, k);
};
"#;

const ITERTOOLS: &str = r#"
exports.range = function (start, stop, step) {
    if (stop === undefined) { stop = start; start = 0; }
    step = step || 1;
    const out = [];
    for (let i = start; step > 0 ? i < stop : i > stop; i += step) { out.push(i); }
    return out;
};
exports.zip = function () {
    const seqs = Array.from(arguments);
    const size = seqs.length ? Math.min.apply(null, seqs.map(function (s) { return s.length; })) : 0;
    const out = [];
    for (let i = 0; i < size; i++) { out.push(seqs.map(function (s) { return s[i]; })); }
    return out;
};
exports.chain = function () {
    return [].concat.apply([], Array.from(arguments).map(function (s) { return Array.from(s); }));
};
exports.chunks = function (seq, size) {
    const out = [];
    for (let i = 0; i < seq.length; i += size) { out.push(seq.slice(i, i + size)); }
    return out;
};
exports.permutations = function (seq) {
    if (seq.length <= 1) { return [Array.from(seq)]; }
    const out = [];
    for (let i = 0; i < seq.length; i++) {
        const rest = seq.slice(0, i).concat(seq.slice(i + 1));
        exports.permutations(rest).forEach(function (p) { out.push([seq[i]].concat(p)); });
    }
    return out;
};
exports.combinations = function (seq, k) {
    if (k === 0) { return [[]]; }
    const out = [];
    for (let i = 0; i <= seq.length - k; i++) {
        exports.combinations(seq.slice(i + 1), k - 1).forEach(function (c) { out.push([seq[i]].concat(c)); });
    }
    return out;
};
"#;

const COLLECTIONS: &str = r#"
exports.counter = function (items) {
    const counts = {};
    Array.from(items).forEach(function (item) { counts[item] = (counts[item] || 0) + 1; });
    return counts;
};
exports.mostCommon = function (counts, n) {
    const pairs = Object.keys(counts).map(function (key) { return [key, counts[key]]; });
    pairs.sort(function (a, b) { return b[1] - a[1]; });
    return n === undefined ? pairs : pairs.slice(0, n);
};
exports.groupBy = function (items, key) {
    const groups = {};
    Array.from(items).forEach(function (item) {
        const k = key(item);
        (groups[k] = groups[k] || []).push(item);
    });
    return groups;
};
exports.defaultDict = function (factory) {
    return new Proxy({}, {
        get: function (target, prop) {
            if (!(prop in target)) { target[prop] = factory(); }
            return target[prop];
        }
    });
};
"#;

const STRINGS: &str = r##"
exports.asciiLowercase = 'abcdefghijklmnopqrstuvwxyz';
exports.asciiUppercase = 'ABCDEFGHIJKLMNOPQRSTUVWXYZ';
exports.digits = '0123456789';
exports.punctuation = '!"#$%&\'()*+,-./:;<=>?@[\\]^_`{|}~';
exports.capitalize = function (text) {
    return text.length ? text[0].toUpperCase() + text.slice(1).toLowerCase() : text;
};
exports.reverse = function (text) { return Array.from(text).reverse().join(''); };
exports.center = function (text, width, fill) {
    fill = fill || ' ';
    const total = Math.max(width - text.length, 0);
    const left = Math.floor(total / 2);
    return fill.repeat(left) + text + fill.repeat(total - left);
};
"##;

const CLOCK: &str = r#"
exports.now = function () { return Date.now(); };
exports.elapsed = function (since) { return Date.now() - since; };
"#;

/// Source registry for importable modules.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    sources: BTreeMap<String, String>,
}

impl ModuleRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the bundled modules.
    ///
    /// `collections`, `itertools`, `random` and `strings` are allowed by
    /// default; `clock` is registered but must be allowed explicitly.
    pub fn bundled() -> Self {
        let mut registry = Self::new();
        registry.register("random", RANDOM);
        registry.register("itertools", ITERTOOLS);
        registry.register("collections", COLLECTIONS);
        registry.register("strings", STRINGS);
        registry.register("clock", CLOCK);
        registry
    }

    /// Register (or replace) a module.
    pub fn register(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.sources.insert(name.into(), source.into());
    }

    /// Source of a registered module.
    pub fn source(&self, name: &str) -> Result<&str, ImportDenied> {
        self.sources
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| ImportDenied::NotFound(name.to_string()))
    }

    /// True if a module is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    /// Registered module names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    /// Register every `*.js` file in `dir`, named after its file stem.
    ///
    /// Files larger than 1MB are skipped with a warning.
    /// Returns the number of modules registered.
    pub fn load_dir(&mut self, dir: &Path) -> std::io::Result<usize> {
        let mut loaded = 0;
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("js") || !path.is_file() {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let size = fs::metadata(&path)?.len();
            if size > MAX_MODULE_SIZE {
                warn!(path = %path.display(), size, "module file too large, skipping");
                continue;
            }

            let source = fs::read_to_string(&path)?;
            debug!(module = %name, path = %path.display(), "registered module from disk");
            self.register(name, source);
            loaded += 1;
        }
        Ok(loaded)
    }
}
