//! ACL flow control
//!
//! Outbound L2CAP frames are fragmented to the controller's ACL packet length
//! and held in one queue shared by every link. Packets leave the queue only
//! while the number of packets the controller has not yet reported complete
//! stays below the controller's buffer count. Inbound fragments are
//! reassembled per connection handle.

use super::constants::*;
use super::packet::{AclHeader, BufferSize, ConnectionHandle};
use crate::l2cap::constants::L2CAP_BASIC_HEADER_SIZE;
use crate::l2cap::packet::L2capHeader;
use log::{debug, trace, warn};
use std::collections::{HashMap, VecDeque};

/// A fully framed ACL packet waiting for controller credit
#[derive(Debug, Clone)]
struct QueuedPacket {
    handle: ConnectionHandle,
    packet: Vec<u8>,
}

/// An L2CAP frame submitted before the controller reported its buffer sizes
#[derive(Debug, Clone)]
struct DeferredFrame {
    handle: ConnectionHandle,
    flags: u8,
    channel_id: u16,
    payload: Vec<u8>,
}

/// Per-handle accumulator for an L2CAP frame split over several ACL packets
#[derive(Debug, Clone)]
struct ReassemblyBuffer {
    length: usize,
    channel_id: u16,
    data: Vec<u8>,
}

/// A complete inbound L2CAP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L2capFrame {
    pub handle: ConnectionHandle,
    pub channel_id: u16,
    pub payload: Vec<u8>,
}

/// Fragmentation, reassembly and packet-credit accounting for every link
#[derive(Debug, Default)]
pub struct FlowController {
    buffers: Option<BufferSize>,
    pending: HashMap<ConnectionHandle, usize>,
    queue: VecDeque<QueuedPacket>,
    deferred: VecDeque<DeferredFrame>,
    reassembly: HashMap<ConnectionHandle, ReassemblyBuffer>,
}

impl FlowController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Controller buffer limits, once known
    pub fn buffers(&self) -> Option<BufferSize> {
        self.buffers
    }

    /// Record the controller's buffer limits and release frames that were
    /// waiting for them.
    pub fn set_buffers(&mut self, buffers: BufferSize) {
        debug!(
            "ACL buffers: packet length {}, max packets {}",
            buffers.packet_length, buffers.max_packets
        );
        self.buffers = Some(buffers);

        while let Some(frame) = self.deferred.pop_front() {
            self.fragment(
                frame.handle,
                frame.flags,
                frame.channel_id,
                &frame.payload,
                buffers.packet_length as usize,
            );
        }
    }

    /// Start tracking credit for a new link
    pub fn add_link(&mut self, handle: ConnectionHandle) {
        self.pending.insert(handle, 0);
    }

    /// Forget everything held for a link: its credit, partial inbound frame,
    /// and queued outbound packets.
    pub fn remove_link(&mut self, handle: ConnectionHandle) {
        self.pending.remove(&handle);
        self.reassembly.remove(&handle);
        self.queue.retain(|queued| queued.handle != handle);
        self.deferred.retain(|frame| frame.handle != handle);
    }

    /// Packets handed to the controller and not yet reported complete, summed
    /// over all links.
    pub fn outstanding(&self) -> usize {
        self.pending.values().sum()
    }

    /// Outstanding packets for one link
    pub fn pending(&self, handle: ConnectionHandle) -> usize {
        self.pending.get(&handle).copied().unwrap_or(0)
    }

    /// Packets waiting for credit, including frames waiting for buffer sizes
    pub fn queued(&self) -> usize {
        self.queue.len() + self.deferred.len()
    }

    /// Fragment an L2CAP payload and queue the resulting packets.
    ///
    /// Call [`FlowController::drain`] afterwards to collect what may be sent.
    pub fn enqueue(&mut self, handle: ConnectionHandle, flags: u8, channel_id: u16, payload: &[u8]) {
        match self.buffers {
            Some(buffers) => {
                self.fragment(handle, flags, channel_id, payload, buffers.packet_length as usize)
            }
            None => {
                debug!(
                    "Deferring {} byte frame on {} until buffer sizes are known",
                    payload.len(),
                    handle
                );
                self.deferred.push_back(DeferredFrame {
                    handle,
                    flags,
                    channel_id,
                    payload: payload.to_vec(),
                });
            }
        }
    }

    fn fragment(
        &mut self,
        handle: ConnectionHandle,
        flags: u8,
        channel_id: u16,
        payload: &[u8],
        packet_length: usize,
    ) {
        // First packet carries the L2CAP header
        let first_len = (L2CAP_BASIC_HEADER_SIZE + payload.len()).min(packet_length);
        let first_data_len = first_len.saturating_sub(L2CAP_BASIC_HEADER_SIZE);

        let mut packet = Vec::with_capacity(1 + HCI_ACL_HEADER_SIZE + first_len);
        packet.push(HCI_ACL_PKT);
        packet.extend_from_slice(&AclHeader::new(handle, flags, first_len as u16).to_bytes());
        packet.extend_from_slice(&L2capHeader::new(payload.len() as u16, channel_id).to_bytes());
        packet.extend_from_slice(&payload[..first_data_len]);
        trace!("Queued ACL start {}", hex::encode(&packet));
        self.queue.push_back(QueuedPacket { handle, packet });

        for chunk in payload[first_data_len..].chunks(packet_length.max(1)) {
            let mut packet = Vec::with_capacity(1 + HCI_ACL_HEADER_SIZE + chunk.len());
            packet.push(HCI_ACL_PKT);
            packet.extend_from_slice(&AclHeader::new(handle, ACL_CONT, chunk.len() as u16).to_bytes());
            packet.extend_from_slice(chunk);
            trace!("Queued ACL continuation {}", hex::encode(&packet));
            self.queue.push_back(QueuedPacket { handle, packet });
        }
    }

    /// Take every queued packet the controller currently has room for.
    ///
    /// Each returned packet is counted as outstanding against its link.
    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        let max_packets = match self.buffers {
            Some(buffers) => buffers.max_packets as usize,
            None => return Vec::new(),
        };

        let mut ready = Vec::new();
        while !self.queue.is_empty() && self.outstanding() < max_packets {
            let Some(queued) = self.queue.pop_front() else {
                break;
            };
            *self.pending.entry(queued.handle).or_insert(0) += 1;
            ready.push(queued.packet);
        }

        if !ready.is_empty() {
            debug!(
                "Releasing {} ACL packets, {} outstanding, {} still queued",
                ready.len(),
                self.outstanding(),
                self.queue.len()
            );
        }
        ready
    }

    /// Apply a Number Of Completed Packets report for one link.
    pub fn complete(&mut self, handle: ConnectionHandle, count: u16) {
        if let Some(pending) = self.pending.get_mut(&handle) {
            *pending = pending.saturating_sub(count as usize);
        }
    }

    /// Feed one inbound ACL packet. Returns the L2CAP frame it completes, if any.
    pub fn reassemble(&mut self, header: AclHeader, data: &[u8]) -> Option<L2capFrame> {
        let handle = header.handle;

        match header.flags {
            ACL_START => {
                let Some(l2cap) = L2capHeader::parse(data) else {
                    warn!("ACL start fragment on {} too short for an L2CAP header", handle);
                    return None;
                };
                let body = &data[L2CAP_BASIC_HEADER_SIZE..];
                let length = l2cap.length as usize;

                if body.len() == length {
                    self.reassembly.remove(&handle);
                    return Some(L2capFrame {
                        handle,
                        channel_id: l2cap.channel_id,
                        payload: body.to_vec(),
                    });
                }
                if body.len() > length {
                    warn!(
                        "ACL start fragment on {} carries {} bytes for a {} byte frame",
                        handle,
                        body.len(),
                        length
                    );
                    self.reassembly.remove(&handle);
                    return None;
                }

                self.reassembly.insert(
                    handle,
                    ReassemblyBuffer {
                        length,
                        channel_id: l2cap.channel_id,
                        data: body.to_vec(),
                    },
                );
                None
            }
            ACL_CONT => {
                let Some(buffer) = self.reassembly.get_mut(&handle) else {
                    trace!("Dropping continuation on {} with no open frame", handle);
                    return None;
                };
                buffer.data.extend_from_slice(data);

                if buffer.data.len() > buffer.length {
                    warn!(
                        "Reassembly overflow on {}: {} bytes for a {} byte frame",
                        handle,
                        buffer.data.len(),
                        buffer.length
                    );
                    self.reassembly.remove(&handle);
                    return None;
                }
                if buffer.data.len() < buffer.length {
                    return None;
                }

                self.reassembly.remove(&handle).map(|buffer| L2capFrame {
                    handle,
                    channel_id: buffer.channel_id,
                    payload: buffer.data,
                })
            }
            flags => {
                debug!("Ignoring ACL packet on {} with flags 0x{:x}", handle, flags);
                None
            }
        }
    }
}
