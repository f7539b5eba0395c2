//! Batched nonblocking exchange of byte buffers with a fixed neighbor set.
//!
//! The exchange runs in two phases on the host communicator. Phase one
//! swaps one byte count per neighbor pair, phase two swaps the payloads,
//! posting messages only where the corresponding count is nonzero. All
//! requests of a phase are posted inside one request scope and waited on
//! before the scope ends, so no request can leak.

use log::trace;
use mpi::request::WaitGuard;
use mpi::traits::*;
use mpi::Count;

use crate::types::SubdomainId;

const SIZE_TAG: mpi::Tag = 0;
const DATA_TAG: mpi::Tag = 1;

/// Exchange contiguous byte buffers with every neighbor.
///
/// `send_counts[i]` bytes of `send_data`, starting at the prefix sum of the
/// preceding counts, go to `neighbors[i]`. The result is the matching
/// receive buffer and the per-neighbor counts it is partitioned by.
///
/// Every rank must pass the same neighbor relation, with each pair ordering
/// its channels identically; the canonical order is the sorted one produced
/// by [`crate::world::find_neighbors`].
pub fn exchange_buffers<C: Communicator>(
    comm: &C,
    neighbors: &[SubdomainId],
    send_data: &[u8],
    send_counts: &[Count],
) -> (Vec<u8>, Vec<Count>) {
    assert_eq!(neighbors.len(), send_counts.len());
    assert_eq!(
        send_counts.iter().sum::<Count>() as usize,
        send_data.len(),
        "send buffer length is inconsistent with the per-neighbor counts"
    );

    // Phase one: counts.
    let mut recv_counts = vec![0 as Count; neighbors.len()];
    mpi::request::scope(|scope| {
        let mut guards = Vec::with_capacity(2 * neighbors.len());
        for (count, &neighbor) in recv_counts.iter_mut().zip(neighbors) {
            guards.push(WaitGuard::from(
                comm.process_at_rank(neighbor)
                    .immediate_receive_into_with_tag(scope, count, SIZE_TAG),
            ));
        }
        for (count, &neighbor) in send_counts.iter().zip(neighbors) {
            guards.push(WaitGuard::from(
                comm.process_at_rank(neighbor)
                    .immediate_send_with_tag(scope, count, SIZE_TAG),
            ));
        }
    });

    // Phase two: payloads, receives posted before sends.
    let total_recv: usize = recv_counts.iter().map(|&n| n as usize).sum();
    let mut recv_data = vec![0u8; total_recv];
    {
        let mut recv_slices = Vec::with_capacity(neighbors.len());
        let mut rest = recv_data.as_mut_slice();
        for &count in &recv_counts {
            let (head, tail) = rest.split_at_mut(count as usize);
            recv_slices.push(head);
            rest = tail;
        }
        debug_assert!(rest.is_empty());

        mpi::request::scope(|scope| {
            let mut guards = Vec::with_capacity(2 * neighbors.len());
            for (slice, &neighbor) in recv_slices.into_iter().zip(neighbors) {
                if !slice.is_empty() {
                    guards.push(WaitGuard::from(
                        comm.process_at_rank(neighbor)
                            .immediate_receive_into_with_tag(scope, slice, DATA_TAG),
                    ));
                }
            }
            let mut offset = 0;
            for (&count, &neighbor) in send_counts.iter().zip(neighbors) {
                let count = count as usize;
                if count > 0 {
                    guards.push(WaitGuard::from(
                        comm.process_at_rank(neighbor).immediate_send_with_tag(
                            scope,
                            &send_data[offset..offset + count],
                            DATA_TAG,
                        ),
                    ));
                }
                offset += count;
            }
        });
    }

    trace!(
        "exchanged {} bytes out, {} bytes in with {} neighbor(s)",
        send_data.len(),
        total_recv,
        neighbors.len()
    );
    (recv_data, recv_counts)
}
