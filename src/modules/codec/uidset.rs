// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! UID-set arithmetic for FETCH/SEARCH commands: compress sorted UID
//! lists into the `1:3,5,9:11` wire form and split large sets into
//! batches the server will accept.

/// Compress a list of UIDs into IMAP sequence-set syntax. The input is
/// sorted internally; duplicates collapse into their range.
pub fn compress_uid_list(nums: Vec<u32>) -> String {
    if nums.is_empty() {
        return String::new();
    }

    let mut sorted_nums = nums;
    sorted_nums.sort_unstable();
    sorted_nums.dedup();

    let mut result = Vec::new();
    let mut range_start = sorted_nums[0];
    let mut range_end = sorted_nums[0];

    let push_range = |start: u32, end: u32, result: &mut Vec<String>| {
        if start == end {
            result.push(start.to_string());
        } else {
            result.push(format!("{}:{}", start, end));
        }
    };

    for &n in sorted_nums.iter().skip(1) {
        if n == range_end + 1 {
            range_end = n;
        } else {
            push_range(range_start, range_end, &mut result);
            range_start = n;
            range_end = n;
        }
    }
    push_range(range_start, range_end, &mut result);

    result.join(",")
}

/// Split a UID list into per-batch sequence sets of at most
/// `chunk_size` UIDs each, preserving ascending order.
pub fn uid_batches(mut nums: Vec<u32>, chunk_size: usize) -> Vec<String> {
    if nums.is_empty() {
        return Vec::new();
    }
    nums.sort_unstable();
    nums.dedup();
    nums.chunks(chunk_size.max(1))
        .map(|chunk| compress_uid_list(chunk.to_vec()))
        .collect()
}

/// Parse a sequence set back into UIDs; used by tests and cache
/// validation. `*` is not supported here, only finite sets.
pub fn parse_uid_set(set: &str) -> Option<Vec<u32>> {
    let mut out = Vec::new();
    for piece in set.split(',') {
        match piece.split_once(':') {
            Some((a, b)) => {
                let (a, b) = (a.parse::<u32>().ok()?, b.parse::<u32>().ok()?);
                if a > b {
                    return None;
                }
                out.extend(a..=b);
            }
            None => out.push(piece.parse().ok()?),
        }
    }
    Some(out)
}
