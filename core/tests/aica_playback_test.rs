//! Black-box AICA tests: drive the channel register bank and the sample
//! pump only through `Aica`'s public fields/methods and the `RegionOps`
//! register window, the way the audio CPU or host CPU actually would.

use dc_core::device::aica::{Aica, ChannelConfig, EnvelopeStage, CHANNEL_STRIDE};
use dc_core::device::graphics_iface::AudioSink;
use dc_core::memmap::RegionOps;

struct CollectingSink(Vec<i32>);
impl AudioSink for CollectingSink {
    fn submit_samples(&mut self, samples: &[i32]) {
        self.0.extend_from_slice(samples);
    }
}

#[test]
fn global_key_on_only_starts_channels_marked_ready() {
    let mut aica = Aica::new(0x1000);

    // Channel 0's play-control write sets its own ready_keyon bit (14) and
    // the trigger bit (15); channel 1 is left untouched and must stay
    // stopped even though the trigger sweeps every channel.
    RegionOps::write32(&mut aica, 0 * CHANNEL_STRIDE, (1 << 14) | (1 << 15)).unwrap();

    assert_eq!(aica.channels[0].stage(), EnvelopeStage::Attack);
    assert_eq!(aica.channels[1].stage(), EnvelopeStage::Stopped);
}

#[test]
fn sample_pump_streams_audio_through_the_sink_at_the_clock_ratio() {
    let mut aica = Aica::new(0x2000);
    aica.channels[0].cfg = ChannelConfig {
        loop_end: 100_000,
        ..aica.channels[0].cfg
    };
    aica.channels[0].key_on();

    let host_hz = 44_100 * 256;
    let mut sink = CollectingSink(Vec::new());
    let produced = aica.advance(256 * 10, host_hz as u64, &mut sink);

    assert_eq!(produced, 10);
    assert_eq!(sink.0.len(), 10);
}
