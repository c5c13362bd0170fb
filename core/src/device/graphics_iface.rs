//! Stub contracts for the out-of-scope graphics/sound collaborators. The
//! core only needs to *call* these; a real frontend would implement them
//! against the PowerVR tile accelerator and the host's audio output.
//! Graphics/sound rendering itself is a non-goal.

/// Sink for the tile-accelerator input stream. Channel-2 DMA and
/// Sort-DMA both feed this.
pub trait TaFifoSink {
    fn tafifo_input(&mut self, dword: u32);
    fn ta_fifo_poly_write_32(&mut self, addr: u32, val: u32);
    fn tex_mem_write32(&mut self, addr: u32, val: u32);
    fn tex_mem_write64(&mut self, addr: u32, val: u64);
    fn yuv_input_data(&mut self, buf: &[u8]);
    fn end_of_frame(&mut self);
}

/// No-op implementation used whenever a concrete frontend hasn't wired in
/// a real graphics core; keeps the DMA engines testable standalone.
#[derive(Default)]
pub struct NullGraphicsSink;

impl TaFifoSink for NullGraphicsSink {
    fn tafifo_input(&mut self, _dword: u32) {}
    fn ta_fifo_poly_write_32(&mut self, _addr: u32, _val: u32) {}
    fn tex_mem_write32(&mut self, _addr: u32, _val: u32) {}
    fn tex_mem_write64(&mut self, _addr: u32, _val: u64) {}
    fn yuv_input_data(&mut self, _buf: &[u8]) {}
    fn end_of_frame(&mut self) {}
}

/// Sink for decoded audio output samples.
pub trait AudioSink {
    fn submit_samples(&mut self, samples: &[i32]);
}

#[derive(Default)]
pub struct NullAudioSink;

impl AudioSink for NullAudioSink {
    fn submit_samples(&mut self, _samples: &[i32]) {}
}
