// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

pub mod fail;
pub mod logging;

pub use self::fail::Fail;
