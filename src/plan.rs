// Copyright 2024 TAKKT Industrial & Packaging GmbH
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

use crate::{
    consts::{
        DEFAULT_PART_SIZE,
        MAXIMUM_NUMBER_OF_PARTS,
        MAXIMUM_OBJECT_SIZE,
        MAXIMUM_PART_SIZE,
        MINIMUM_PART_NUMBER,
        MINIMUM_PART_SIZE,
    },
    result::{
        bail,
        Error,
        Result,
    },
};
use std::fmt::{
    Display,
    Formatter,
};

/// Target size of the parts an object is split into.
///
/// Always within `MINIMUM_PART_SIZE..=MAXIMUM_PART_SIZE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PartSize(u64);

impl PartSize {
    pub(crate) fn get(self) -> u64 {
        self.0
    }
}

impl Default for PartSize {
    fn default() -> Self {
        Self(DEFAULT_PART_SIZE)
    }
}

impl TryFrom<u64> for PartSize {
    type Error = Error;

    fn try_from(value: u64) -> Result<Self> {
        if value < MINIMUM_PART_SIZE {
            bail!(
                "The part size is too small, it must be at least {} bytes",
                MINIMUM_PART_SIZE
            );
        } else if value > MAXIMUM_PART_SIZE {
            bail!(
                "The part size is too large, it must be at most {} bytes",
                MAXIMUM_PART_SIZE
            );
        }
        Ok(Self(value))
    }
}

/// An inclusive byte range of the source object, copied as one part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PartitionRange {
    pub(crate) part_number: i32,
    pub(crate) start: u64,
    pub(crate) end: u64,
}

impl PartitionRange {
    fn new(part_number: i32, start: u64, length: u64) -> Self {
        Self {
            part_number,
            start,
            end: start + length - 1,
        }
    }

    pub(crate) fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// The range in HTTP `Range` header syntax, e.g. `bytes=0-49999999`.
    pub(crate) fn http_range(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

impl Display for PartitionRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "part {} ({}-{})", self.part_number, self.start, self.end)
    }
}

/// Converts the content length reported by the backend into an object size.
pub(crate) fn object_size_from_content_length(content_length: i64) -> Result<u64> {
    match u64::try_from(content_length) {
        Ok(object_size) => Ok(object_size),
        Err(_) => bail!("The object size can't be negative, got {}", content_length),
    }
}

/// Number of ranges [`plan`] produces for the given sizes.
pub(crate) fn part_count(object_size: u64, part_size: PartSize) -> u64 {
    let full_parts = object_size / part_size.get();
    let remainder = object_size % part_size.get();
    if full_parts == 0 {
        u64::from(object_size > 0)
    } else if remainder >= MINIMUM_PART_SIZE {
        full_parts + 1
    } else {
        full_parts
    }
}

/// Rejects object sizes that can't be copied with the given part size.
pub(crate) fn validate(object_size: u64, part_size: PartSize) -> Result<()> {
    if object_size == 0 {
        bail!("The object is empty, and an empty multipart copy can't be completed");
    } else if object_size > MAXIMUM_OBJECT_SIZE {
        bail!(
            "The object size of {} bytes exceeds the maximum object size of {} bytes",
            object_size,
            MAXIMUM_OBJECT_SIZE
        );
    }
    let number_of_parts = part_count(object_size, part_size);
    if number_of_parts > MAXIMUM_NUMBER_OF_PARTS {
        bail!(
            "A part size of {} bytes would need {} parts, but at most {} are allowed",
            part_size.get(),
            number_of_parts,
            MAXIMUM_NUMBER_OF_PARTS
        );
    }
    let full_parts = object_size / part_size.get();
    let remainder = object_size % part_size.get();
    if full_parts >= 1
        && remainder < MINIMUM_PART_SIZE
        && part_size.get() + remainder > MAXIMUM_PART_SIZE
    {
        bail!(
            "Folding the trailing {} bytes into the last part would exceed the maximum part size of {} bytes",
            remainder,
            MAXIMUM_PART_SIZE
        );
    }
    Ok(())
}

/// Splits an object into ordered, contiguous byte ranges of `part_size` bytes each.
///
/// A trailing remainder shorter than `MINIMUM_PART_SIZE` is folded into the last full part
/// instead of becoming a part of its own. An object smaller than `part_size` becomes a single
/// part regardless of its size, and an empty object yields no parts at all.
///
/// The object size is expected to have passed [`validate`], which keeps the part numbers
/// within `i32`.
pub(crate) fn plan(object_size: u64, part_size: PartSize) -> Vec<PartitionRange> {
    let part_size = part_size.get();
    let full_parts = object_size / part_size;
    let remainder = object_size % part_size;

    if full_parts == 0 {
        if object_size == 0 {
            return vec![];
        }
        return vec![PartitionRange::new(MINIMUM_PART_NUMBER, 0, object_size)];
    }

    let mut ranges = Vec::with_capacity(full_parts as usize + 1);
    for index in 0..full_parts {
        let length = if index + 1 == full_parts && remainder < MINIMUM_PART_SIZE {
            part_size + remainder
        } else {
            part_size
        };
        ranges.push(PartitionRange::new(
            MINIMUM_PART_NUMBER + index as i32,
            index * part_size,
            length,
        ));
    }
    if remainder >= MINIMUM_PART_SIZE {
        ranges.push(PartitionRange::new(
            MINIMUM_PART_NUMBER + full_parts as i32,
            full_parts * part_size,
            remainder,
        ));
    }
    ranges
}
