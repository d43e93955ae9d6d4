//! Fuzz target for key normalization and file-stem sanitizing.
//!
//! Any key that normalizes must map to a file stem that stays inside the
//! media directory, and distinct keys must never share a stem.

#![no_main]

use emoji_replicator::media::file_stem;
use emoji_replicator::store::normalize_key;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (&str, &str)| {
    let (a, b) = data;

    // Should never panic
    let ka = normalize_key(a);
    let kb = normalize_key(b);

    if let Ok(key) = &ka {
        assert!(!key.is_empty());
        assert_eq!(key.trim(), key.as_str());
        // Idempotent
        assert_eq!(normalize_key(key).ok().as_ref(), Some(key));

        let stem = file_stem(key);
        assert!(stem.is_ascii());
        assert!(!stem.contains('/'));
        assert!(!stem.contains('\\'));
        assert!(!stem.starts_with('.'));
    }

    // Injective on normalized keys
    if let (Ok(ka), Ok(kb)) = (ka, kb) {
        if ka != kb {
            assert_ne!(file_stem(&ka), file_stem(&kb));
        }
    }
});
