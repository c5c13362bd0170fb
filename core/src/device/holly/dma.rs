//! Channel-2 DMA and Sort-DMA. Both stream words from main RAM
//! into the tile-accelerator FIFO; Sort-DMA additionally walks a
//! software-built linked list of link addresses rather than transferring a
//! single flat run.

use crate::device::graphics_iface::TaFifoSink;
use crate::error::{CoreError, CoreResult};
use crate::scheduler::CycleStamp;

/// Texture-window destination class, used only to pick the empirically
/// measured timing curve — the byte-for-byte copy
/// itself doesn't care which window it lands in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ch2DmaDest {
    TaFifoPoly,
    TexRegion0,
    TexRegion1,
}

/// Straightforward main-RAM-to-graphics-bus burst DMA. The copy itself
/// happens synchronously the instant
/// `start` is called; the `CycleStamp` it returns is how far in the future
/// the *completion interrupt* should be scheduled, modeling the window's
/// bus bandwidth rather than gating the data transfer on it.
pub struct Channel2Dma {
    pub lmmode0: bool,
    pub lmmode1: bool,
}

impl Channel2Dma {
    pub fn new() -> Self {
        Self {
            lmmode0: false,
            lmmode1: false,
        }
    }

    /// Copy `len` bytes from `main_ram[src_offset..]` to the graphics sink,
    /// returning the modeled completion latency in host-clock cycles,
    /// generalized across the three destination classes from an
    /// empirically measured bandwidth curve.
    pub fn start(
        &mut self,
        main_ram: &[u8],
        src_offset: u32,
        dest: Ch2DmaDest,
        len: u32,
        sink: &mut dyn TaFifoSink,
        host_clock_hz: f64,
    ) -> CoreResult<CycleStamp> {
        let n_words = len / 4;
        let src = src_offset as usize;
        let end = src + len as usize;
        let bytes = main_ram
            .get(src..end)
            .ok_or_else(|| CoreError::mem_fault(src_offset, len, crate::error::AccessDirection::Read))?;

        for chunk in bytes.chunks_exact(4) {
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            match dest {
                Ch2DmaDest::TaFifoPoly => sink.ta_fifo_poly_write_32(0, word),
                Ch2DmaDest::TexRegion0 | Ch2DmaDest::TexRegion1 => sink.tex_mem_write32(0, word),
            }
        }

        let lmmode_wide = match dest {
            Ch2DmaDest::TaFifoPoly => false,
            Ch2DmaDest::TexRegion0 => self.lmmode0,
            Ch2DmaDest::TexRegion1 => self.lmmode1,
        };
        let (slope, intercept) = if lmmode_wide {
            (0.032643091507195, 9.09723447094439)
        } else {
            (0.019373669058526, 10.9678657897639)
        };
        let bytes_xferred = (n_words * 4) as f64;
        let n_secs = (bytes_xferred * slope + intercept) / (50.0 * 1024.0 * 1024.0 / 4.0);
        Ok((n_secs * host_clock_hz).round() as CycleStamp)
    }
}

impl Default for Channel2Dma {
    fn default() -> Self {
        Self::new()
    }
}

/// Sentinel link values in a Sort-DMA link table entry: `1` ends the
/// current link chain and advances to the next table entry, `2` ends
/// the entire transfer.
const SORT_DMA_LINK_END_CHAIN: u32 = 1;
const SORT_DMA_LINK_END_TRANSFER: u32 = 2;

/// Tile-accelerator parameter type, classified from a control word's
/// opcode field. Header packets set the vertex length used to auto-size
/// subsequent vertex packets from the most recent header packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TaParamKind {
    Header,
    Vertex,
}

fn classify_opcode(ctrl_word: u32) -> TaParamKind {
    // Bits 31:29 of the control word hold the parameter type in the real
    // TA packet format; 0 and 1 are end-of-list/user-clip (treated here as
    // header-shaped), everything else is vertex data.
    match (ctrl_word >> 29) & 0x7 {
        0 | 1 | 2 | 3 | 4 => TaParamKind::Header,
        _ => TaParamKind::Vertex,
    }
}

/// Walks a software-supplied table of 32-bit link addresses in main
/// memory, streaming tile-accelerator packets into `sink` in the order
/// software laid them out.
pub struct SortDma {
    pub last_vertex_len_words: u32,
}

impl SortDma {
    pub fn new() -> Self {
        Self {
            last_vertex_len_words: 8, // a plausible default vertex size
        }
    }

    /// Run the entire transfer synchronously starting from the table at
    /// `table_offset` within `main_ram`, returning the number of 32-bit
    /// words streamed (for tests/telemetry).
    pub fn run(
        &mut self,
        main_ram: &[u8],
        table_offset: u32,
        sink: &mut dyn TaFifoSink,
    ) -> CoreResult<u32> {
        let mut words_streamed = 0u32;
        let mut table_pos = table_offset;

        loop {
            let link = read32(main_ram, table_pos)?;
            if link == SORT_DMA_LINK_END_TRANSFER {
                break;
            }
            if link == SORT_DMA_LINK_END_CHAIN {
                table_pos += 4;
                continue;
            }

            words_streamed += self.stream_chain(main_ram, link, sink)?;
            table_pos += 4;
        }

        Ok(words_streamed)
    }

    /// Stream one link's worth of packets: a control word, a length field,
    /// a next-link field, then `length` bytes of packet payload.
    fn stream_chain(
        &mut self,
        main_ram: &[u8],
        mut link_addr: u32,
        sink: &mut dyn TaFifoSink,
    ) -> CoreResult<u32> {
        let mut words = 0u32;
        loop {
            if link_addr == SORT_DMA_LINK_END_CHAIN || link_addr == SORT_DMA_LINK_END_TRANSFER {
                return Ok(words);
            }

            let ctrl = read32(main_ram, link_addr)?;
            let kind = classify_opcode(ctrl);
            let len_words = match kind {
                TaParamKind::Header => {
                    let len = read32(main_ram, link_addr + 4)?;
                    self.last_vertex_len_words = len.max(1);
                    len
                }
                TaParamKind::Vertex => self.last_vertex_len_words,
            };
            let next_link = read32(main_ram, link_addr + 8)?;

            let payload_start = link_addr + 12;
            for i in 0..len_words {
                let w = read32(main_ram, payload_start + i * 4)?;
                sink.tafifo_input(w);
                words += 1;
            }

            link_addr = next_link;
        }
    }
}

impl Default for SortDma {
    fn default() -> Self {
        Self::new()
    }
}

fn read32(buf: &[u8], addr: u32) -> CoreResult<u32> {
    let o = addr as usize;
    let b = buf
        .get(o..o + 4)
        .ok_or_else(|| CoreError::mem_fault(addr, 4, crate::error::AccessDirection::Read))?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingSink {
        words: Vec<u32>,
    }
    impl TaFifoSink for RecordingSink {
        fn tafifo_input(&mut self, dword: u32) {
            self.words.push(dword);
        }
        fn ta_fifo_poly_write_32(&mut self, _addr: u32, val: u32) {
            self.words.push(val);
        }
        fn tex_mem_write32(&mut self, _addr: u32, val: u32) {
            self.words.push(val);
        }
        fn tex_mem_write64(&mut self, _addr: u32, _val: u64) {}
        fn yuv_input_data(&mut self, _buf: &[u8]) {}
        fn end_of_frame(&mut self) {}
    }

    #[test]
    fn channel2_dma_copies_words_and_returns_positive_latency() {
        let mut ram = vec![0u8; 256];
        ram[0..4].copy_from_slice(&0xdead_beefu32.to_le_bytes());
        ram[4..8].copy_from_slice(&0x1234_5678u32.to_le_bytes());
        let mut dma = Channel2Dma::new();
        let mut sink = RecordingSink { words: Vec::new() };
        let cycles = dma
            .start(&ram, 0, Ch2DmaDest::TaFifoPoly, 8, &mut sink, 200_000_000.0)
            .unwrap();
        assert_eq!(sink.words, vec![0xdead_beef, 0x1234_5678]);
        assert!(cycles > 0);
    }

    #[test]
    fn sort_dma_streams_header_then_vertices_in_order() {
        // Table: one entry -> chain -> sentinel 2 (end of transfer).
        let mut ram = vec![0u8; 4096];
        let table_off = 0u32;
        let link0 = 0x100u32;
        ram[table_off as usize..table_off as usize + 4].copy_from_slice(&link0.to_le_bytes());

        // Link0: header packet (ctrl opcode 0 => header), len=2, next=link1.
        let link1 = 0x200u32;
        ram[0x100..0x104].copy_from_slice(&0u32.to_le_bytes()); // ctrl (header, opcode bits 0)
        ram[0x104..0x108].copy_from_slice(&2u32.to_le_bytes()); // length in words
        ram[0x108..0x10c].copy_from_slice(&link1.to_le_bytes()); // next link
        ram[0x10c..0x110].copy_from_slice(&0xAAAAAAAAu32.to_le_bytes());
        ram[0x110..0x114].copy_from_slice(&0xBBBBBBBBu32.to_le_bytes());

        // Link1: vertex packet (opcode bits = 7 => vertex), next = sentinel 1
        // (end of chain), inherits header's length of 2 words.
        ram[0x200..0x204].copy_from_slice(&(0x7u32 << 29).to_le_bytes());
        ram[0x204..0x208].copy_from_slice(&0u32.to_le_bytes());
        ram[0x208..0x20c].copy_from_slice(&1u32.to_le_bytes()); // sentinel: end of chain
        ram[0x20c..0x210].copy_from_slice(&0x11111111u32.to_le_bytes());
        ram[0x210..0x214].copy_from_slice(&0x22222222u32.to_le_bytes());

        // Table entry index 1: sentinel 2 (end of entire transfer).
        ram[4..8].copy_from_slice(&SORT_DMA_LINK_END_TRANSFER.to_le_bytes());

        let mut sdma = SortDma::new();
        let mut sink = RecordingSink { words: Vec::new() };
        let n = sdma.run(&ram, table_off, &mut sink).unwrap();
        assert_eq!(n, 4);
        assert_eq!(
            sink.words,
            vec![0xAAAAAAAA, 0xBBBBBBBB, 0x11111111, 0x22222222]
        );
    }
}
