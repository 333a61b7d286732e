// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to handle reading visibilities in and passing them through processing
//! stages to a visibility sink.

pub mod read;
pub mod write;
