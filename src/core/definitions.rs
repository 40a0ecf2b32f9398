//! Classifier vocabularies shared with the control plane and rules files.
//!
//! The string tokens and numeric values in this module are protocol
//! constants: rules files and control-plane payloads reference them, so
//! they must not be renumbered. Unknown tokens always convert to `-1`
//! rather than failing, which lets a stage skip vocabulary it does not
//! know yet.

/// Neutral operation tag shared by every vocabulary.
pub const NO_OP: i32 = 0;

/// Families of operation classifiers a context can be tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextType {
    General = 0,
    Posix = 1,
    PosixMeta = 2,
    LsmKvsSimple = 3,
    LsmKvsDetailed = 4,
    Kvs = 5,
}

impl ContextType {
    /// Convert a rules-file token into a context type. The token set is
    /// fixed; anything else is unknown.
    pub fn from_token(token: &str) -> Option<ContextType> {
        match token {
            "PAIO_GENERAL" => Some(ContextType::General),
            "POSIX" => Some(ContextType::Posix),
            "POSIX_META" => Some(ContextType::PosixMeta),
            "LSM_KVS_SIMPLE" => Some(ContextType::LsmKvsSimple),
            "LSM_KVS_DETAILED" => Some(ContextType::LsmKvsDetailed),
            "KVS" => Some(ContextType::Kvs),
            _ => None,
        }
    }
}

// General-purpose request tags: context (foreground or background) and
// priority, for embedding layers that do not need a richer vocabulary.
fn convert_general(token: &str) -> i64 {
    match token {
        "no_op" => 0,
        "foreground" => 1,
        "background" => 2,
        "high_priority" => 3,
        "low_priority" => 4,
        _ => -1,
    }
}

// Context tags of LSM key-value stores, aggregated by priority.
fn convert_lsm_kvs_simple(token: &str) -> i64 {
    match token {
        "no_op" => 0,
        "bg_flush" => 1,
        "bg_compaction_high_priority" => 2,
        "bg_compaction_low_priority" => 3,
        "foreground" => 4,
        "background" => 5,
        _ => -1,
    }
}

// Context tags of LSM key-value stores with per-level compaction detail.
fn convert_lsm_kvs_detailed(token: &str) -> i64 {
    match token {
        "no_op" => 0,
        "bg_flush" => 1,
        "bg_compaction" => 2,
        "bg_compaction_L0_L0" => 3,
        "bg_compaction_L0_L1" => 4,
        "bg_compaction_L1_L2" => 5,
        "bg_compaction_L2_L3" => 6,
        "bg_compaction_LN" => 7,
        "foreground" => 8,
        _ => -1,
    }
}

// Operation types of POSIX applications.
fn convert_posix(token: &str) -> i64 {
    match token {
        "no_op" => 0,
        "read" => 1,
        "write" => 2,
        "pread" => 3,
        "pwrite" => 4,
        "pread64" => 5,
        "pwrite64" => 6,
        "fread" => 7,
        "fwrite" => 8,
        "open" => 9,
        "open64" => 10,
        "creat" => 11,
        "creat64" => 12,
        "openat" => 13,
        "close" => 14,
        "fsync" => 15,
        "fdatasync" => 16,
        "sync" => 17,
        "syncfs" => 18,
        "truncate" => 19,
        "truncate64" => 20,
        "ftruncate" => 21,
        "ftruncate64" => 22,
        "xstat" => 23,
        "xstat64" => 24,
        "lxstat" => 25,
        "lxstat64" => 26,
        "fxstat" => 27,
        "fxstat64" => 28,
        "fxstatat" => 29,
        "fxstatat64" => 30,
        "statfs" => 31,
        "statfs64" => 32,
        "fstatfs" => 33,
        "fstatfs64" => 34,
        "link" => 35,
        "linkat" => 36,
        "unlink" => 37,
        "unlinkat" => 38,
        "rename" => 39,
        "renameat" => 40,
        "symlink" => 41,
        "symlinkat" => 42,
        "readlink" => 43,
        "readlinkat" => 44,
        "fopen" => 45,
        "fopen64" => 46,
        "fdopen" => 47,
        "freopen" => 48,
        "freopen64" => 49,
        "fclose" => 50,
        "fflush" => 51,
        "access" => 52,
        "faccessat" => 53,
        "lseek" => 54,
        "lseek64" => 55,
        "fseek" => 56,
        "fseek64" => 57,
        "ftell" => 58,
        "fseeko" => 59,
        "fseeko64" => 60,
        "ftello" => 61,
        "ftello64" => 62,
        "mkdir" => 63,
        "mkdirat" => 64,
        "readdir" => 65,
        "readdir64" => 66,
        "opendir" => 67,
        "fdopendir" => 68,
        "closedir" => 69,
        "rmdir" => 70,
        "dirfd" => 71,
        "getxattr" => 72,
        "lgetxattr" => 73,
        "fgetxattr" => 74,
        "setxattr" => 75,
        "lsetxattr" => 76,
        "fsetxattr" => 77,
        "listxattr" => 78,
        "llistxattr" => 79,
        "flistxattr" => 80,
        "removexattr" => 81,
        "lremovexattr" => 82,
        "fremovexattr" => 83,
        "chmod" => 84,
        "fchmod" => 85,
        "fchmodat" => 86,
        "chown" => 87,
        "lchown" => 88,
        "fchown" => 89,
        "fchownat" => 90,
        _ => -1,
    }
}

// Meta classes of POSIX operations: context, priority, and operation class.
fn convert_posix_meta(token: &str) -> i64 {
    match token {
        "no_op" => 0,
        "foreground" => 1,
        "background" => 2,
        "high_priority" => 3,
        "med_priority" => 4,
        "low_priority" => 5,
        "data_op" => 6,
        "meta_op" => 7,
        "dir_op" => 8,
        "ext_attr_op" => 9,
        "file_mod_op" => 10,
        _ => -1,
    }
}

// Operation types of LSM-based key-value stores.
fn convert_kvs(token: &str) -> i64 {
    match token {
        "no_op" => 0,
        "put" => 1,
        "get" => 2,
        "new_iterator" => 3,
        "delete" => 4,
        "write" => 5,
        "get_snapshot" => 6,
        "get_property" => 7,
        "get_approximate_size" => 8,
        "compact_range" => 9,
        _ => -1,
    }
}

/// Convert a context-type token to its numeric value; `-1` when unknown.
pub fn convert_context_type(token: &str) -> i64 {
    match ContextType::from_token(token) {
        Some(context_type) => context_type as i64,
        None => -1,
    }
}

/// Convert an operation token under a given context-type vocabulary.
///
/// Numeric tokens pass through unchanged so rules files can mix symbolic
/// and raw values; anything unrecognized becomes `-1`.
pub fn convert_operation(context_type: &str, token: &str) -> i64 {
    let value = match ContextType::from_token(context_type) {
        Some(ContextType::General) => convert_general(token),
        Some(ContextType::Posix) => convert_posix(token),
        Some(ContextType::PosixMeta) => convert_posix_meta(token),
        Some(ContextType::LsmKvsSimple) => convert_lsm_kvs_simple(token),
        Some(ContextType::LsmKvsDetailed) => convert_lsm_kvs_detailed(token),
        Some(ContextType::Kvs) => convert_kvs(token),
        None => -1,
    };
    if value == -1 {
        token.parse::<i64>().unwrap_or(-1)
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_type_tokens_are_fixed() {
        assert_eq!(convert_context_type("PAIO_GENERAL"), 0);
        assert_eq!(convert_context_type("POSIX"), 1);
        assert_eq!(convert_context_type("POSIX_META"), 2);
        assert_eq!(convert_context_type("LSM_KVS_SIMPLE"), 3);
        assert_eq!(convert_context_type("LSM_KVS_DETAILED"), 4);
        assert_eq!(convert_context_type("KVS"), 5);
        assert_eq!(convert_context_type("SOMETHING_ELSE"), -1);
    }

    #[test]
    fn posix_table_covers_the_vocabulary() {
        assert_eq!(convert_operation("POSIX", "read"), 1);
        assert_eq!(convert_operation("POSIX", "fchownat"), 90);
        assert_eq!(convert_operation("POSIX", "no_op"), 0);
        assert_eq!(convert_operation("POSIX", "not_a_syscall"), -1);
    }

    #[test]
    fn unknown_tokens_convert_to_minus_one() {
        assert_eq!(convert_operation("KVS", "merge"), -1);
        assert_eq!(convert_operation("NOT_A_CONTEXT", "put"), -1);
    }

    #[test]
    fn numeric_tokens_pass_through() {
        assert_eq!(convert_operation("PAIO_GENERAL", "42"), 42);
        assert_eq!(convert_operation("KVS", "-1"), -1);
    }
}
