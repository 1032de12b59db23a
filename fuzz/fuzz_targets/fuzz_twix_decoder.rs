#![no_main]

use libfuzzer_sys::fuzz_target;

use twix2mrd::classify::classify;
use twix2mrd::config::Settings;
use twix2mrd::normalize::{normalize, NormalizeOptions};
use twix2mrd::twix::TwixFile;

fuzz_target!(|data: &[u8]| {
    // Header parsing, record decoding and normalization must fail with an
    // error, never panic.
    let Ok(twix) = TwixFile::from_bytes(data.to_vec()) else {
        return;
    };
    for record in twix.records().take(10_000) {
        if record.is_err() {
            break;
        }
    }

    let Ok(container) = twix.into_container() else {
        return;
    };
    let Ok(classification) = classify(&container.protocol, &container.records, None) else {
        return;
    };
    let settings = Settings::new(".", "fuzz");
    let options = NormalizeOptions::new(&classification, settings.category(classification.category));
    let _ = normalize(&container.protocol, container.records, &options);
});
