// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Fake-address codec for the scripted runtime.
//!
//! The scripted debuggee has no native addresses, so the worker manufactures a
//! reversible encoding from (file, line) pairs: `addr = line * 10000 + file_id`.
//! File ids are allocated on first sight; both the full path and its
//! working-directory-relative variant resolve to the same id, so breakpoints bind
//! no matter which spelling the front-end or the runtime uses.

use fnv::FnvHashMap;

/// Single constant splitting the line number from the file id.
pub const FAKE_ADDRESS_DIVISOR: u64 = 10000;

/// Prefixes that begin the relative variant of a path outside the working
/// directory, checked in this order.
const RELATIVE_ROOTS: [&str; 3] = ["script/", "source/", "src/"];

pub struct SourceMap {
    // Lower-cased, forward-slashed, trailing-slash-terminated. Empty until the
    // runtime handshake provides it.
    working_dir: String,

    // Reverse map stores the full path only.
    id_to_path: FnvHashMap<u64, String>,
    path_to_id: FnvHashMap<String, u64>,

    // Id 0 is the empty path; real files start at 1.
    next_id: u64,
}

impl SourceMap {
    pub fn new() -> Self {
        Self {
            working_dir: String::new(),
            id_to_path: FnvHashMap::default(),
            path_to_id: FnvHashMap::default(),
            next_id: 1,
        }
    }

    pub fn set_working_dir(&mut self, dir: &str) {
        let mut dir = dir.replace('\\', "/").to_lowercase();
        if !dir.is_empty() && !dir.ends_with('/') {
            dir.push('/');
        }
        self.working_dir = dir;
    }

    pub fn working_dir(&self) -> &str {
        &self.working_dir
    }

    fn canonical(path: &str) -> String {
        path.replace('\\', "/").to_lowercase()
    }

    /// The working-directory-relative spelling of `path`, or the canonical path
    /// itself when it does not live under the working directory.
    pub fn relative_path(&self, path: &str) -> String {
        let canonical = Self::canonical(path);
        if !self.working_dir.is_empty() && canonical.starts_with(&self.working_dir) {
            canonical[self.working_dir.len()..].to_string()
        } else {
            canonical
        }
    }

    fn relative_variant(&self, canonical: &str) -> Option<String> {
        if !self.working_dir.is_empty() && canonical.starts_with(&self.working_dir) {
            return Some(canonical[self.working_dir.len()..].to_string());
        }

        for root in RELATIVE_ROOTS {
            if let Some(index) = canonical.find(root) {
                return Some(canonical[index..].to_string());
            }
        }

        None
    }

    pub fn id_for_path(&mut self, path: &str) -> u64 {
        if path.is_empty() {
            return 0;
        }

        let canonical = Self::canonical(path);
        if let Some(&id) = self.path_to_id.get(&canonical) {
            return id;
        }

        let id = self.next_id;
        self.next_id += 1;

        if let Some(relative) = self.relative_variant(&canonical) {
            self.path_to_id.entry(relative).or_insert(id);
        }

        self.id_to_path.insert(id, canonical.clone());
        self.path_to_id.insert(canonical, id);

        id
    }

    pub fn path_for_id(&self, id: u64) -> String {
        self.id_to_path.get(&id).cloned().unwrap_or_default()
    }

    /// Manufacture an address from a file and line.
    pub fn encode(&mut self, path: &str, line: u32) -> u64 {
        u64::from(line) * FAKE_ADDRESS_DIVISOR + self.id_for_path(path)
    }

    /// Recover the file and line an address encodes.
    pub fn decode(&self, address: u64) -> (String, u32) {
        let line = (address / FAKE_ADDRESS_DIVISOR) as u32;
        let path = self.path_for_id(address % FAKE_ADDRESS_DIVISOR);
        (path, line)
    }
}

impl Default for SourceMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_with_workdir(dir: &str) -> SourceMap {
        let mut map = SourceMap::new();
        map.set_working_dir(dir);
        map
    }

    #[test]
    fn working_dir_is_normalized() {
        let map = map_with_workdir("D:\\Proj\\Game");
        assert_eq!(map.working_dir(), "d:/proj/game/");
    }

    #[test]
    fn encode_decode_round_trips() {
        let mut map = map_with_workdir("/proj/");

        let addr = map.encode("/proj/script/a.lua", 12);
        assert_eq!(addr % FAKE_ADDRESS_DIVISOR, 1);
        assert_eq!(addr / FAKE_ADDRESS_DIVISOR, 12);

        let (path, line) = map.decode(addr);
        assert_eq!(path, "/proj/script/a.lua");
        assert_eq!(line, 12);
    }

    #[test]
    fn full_and_relative_paths_share_an_id() {
        let mut map = map_with_workdir("/proj/");

        let full = map.id_for_path("/proj/script/a.lua");
        let relative = map.id_for_path("script/a.lua");
        assert_eq!(full, relative);

        // The reverse map keeps the full spelling.
        assert_eq!(map.path_for_id(full), "/proj/script/a.lua");
    }

    #[test]
    fn backslashes_and_case_are_canonicalized() {
        let mut map = map_with_workdir("c:/proj/");

        let a = map.id_for_path("C:\\Proj\\Script\\Main.lua");
        let b = map.id_for_path("c:/proj/script/main.lua");
        assert_eq!(a, b);
    }

    #[test]
    fn relative_root_fallback_checks_in_order() {
        // Working dir does not prefix this path; the first `script/` begins the
        // relative variant even though `src/` also appears later.
        let mut map = map_with_workdir("/elsewhere/");

        let id = map.id_for_path("/opt/game/script/src/a.lua");
        assert_eq!(map.id_for_path("script/src/a.lua"), id);
    }

    #[test]
    fn source_root_used_when_script_absent() {
        let mut map = map_with_workdir("/elsewhere/");

        let id = map.id_for_path("/opt/game/source/b.lua");
        assert_eq!(map.id_for_path("source/b.lua"), id);
    }

    #[test]
    fn empty_path_is_id_zero_both_ways() {
        let mut map = SourceMap::new();

        assert_eq!(map.id_for_path(""), 0);
        assert_eq!(map.path_for_id(0), "");

        // Real files never land on id 0.
        let id = map.id_for_path("script/a.lua");
        assert_ne!(id, 0);
    }

    #[test]
    fn ids_allocate_monotonically() {
        let mut map = SourceMap::new();

        let a = map.id_for_path("script/a.lua");
        let b = map.id_for_path("script/b.lua");
        let c = map.id_for_path("script/c.lua");
        assert!(a < b && b < c);

        // Re-encountering a path never reallocates.
        assert_eq!(map.id_for_path("script/a.lua"), a);
    }

    #[test]
    fn codec_is_a_bijection_on_seen_paths() {
        let mut map = map_with_workdir("/proj/");
        let paths = [
            "/proj/script/a.lua",
            "/proj/script/b.lua",
            "source/util.lua",
            "/opt/tools/src/c.lua",
        ];

        for (index, path) in paths.iter().enumerate() {
            let line = (index as u32 + 1) * 17;
            let addr = map.encode(path, line);
            let (decoded_path, decoded_line) = map.decode(addr);
            let id = map.id_for_path(path);
            assert_eq!(decoded_path, map.path_for_id(id));
            assert_eq!(decoded_line, line);
        }
    }
}
