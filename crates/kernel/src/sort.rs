//! Bitonic sorting network used by the compute backend.
//!
//! The network sorts a power-of-two sized array in `log2(n) (log2(n) + 1) / 2`
//! rounds. Each round is a data-parallel compare-exchange over all indices,
//! and rounds must be separated by a barrier. [`bitonic_stages`] lists the
//! rounds; the GPU backend dispatches one pass per round, and
//! [`bitonic_sort`] runs the same network on the host.

/// One compare-exchange round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitonicStage {
    /// Length of the bitonic blocks being merged; selects the direction.
    pub block_len: u32,
    /// Length of the sequences split in this round; partners are
    /// `seq_len / 2` apart.
    pub seq_len: u32,
}

/// Rounds of the network for `n` elements (`n` a power of two), in order.
pub fn bitonic_stages(n: u32) -> Vec<BitonicStage> {
    debug_assert!(n.is_power_of_two());
    let mut stages = Vec::new();
    let mut block_len = 2;
    while block_len <= n {
        let mut seq_len = block_len;
        while seq_len > 1 {
            stages.push(BitonicStage { block_len, seq_len });
            seq_len /= 2;
        }
        block_len *= 2;
    }
    stages
}

/// Compare-exchange for index `i` in `stage`; the same rule the shader applies
/// per invocation. Only the lower index of each pair acts.
#[inline]
fn compare_exchange<T: Ord + Copy>(data: &mut [T], i: usize, stage: BitonicStage) {
    let partner = i ^ ((stage.seq_len >> 1) as usize);
    if partner <= i {
        return;
    }
    let ascending = (i & (stage.block_len as usize)) == 0;
    let (a, b) = (data[i], data[partner]);
    if (a > b) == ascending && a != b {
        data[i] = b;
        data[partner] = a;
    }
}

/// Sort `data` (power-of-two length) with the bitonic network.
pub fn bitonic_sort<T: Ord + Copy>(data: &mut [T]) {
    let n = data.len();
    if n < 2 {
        return;
    }
    debug_assert!(n.is_power_of_two(), "bitonic sort needs a power-of-two length, got {n}");
    for stage in bitonic_stages(n as u32) {
        for i in 0..n {
            compare_exchange(data, i, stage);
        }
    }
}
