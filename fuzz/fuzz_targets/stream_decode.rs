// Copyright 2023-2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![no_main]

use libfuzzer_sys::fuzz_target;

use shnenc::seek::SeekTable;

fuzz_target!(|data: &[u8]| {
    // Errors are fine, panics are not.
    if let Ok(decoded) = shnenc::decode(data) {
        let channels = decoded.header().channels();
        assert_eq!(decoded.samples().len() % channels, 0);
    }
    let _ = SeekTable::find_appended(data);
});
