//! Controller-side endpoints: the command channel and the audio handshake.

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::protocol::{AsyncCommand, Response, MAX_BLOCK_SIZE};
use crate::shared_memory::{AudioHeader, AudioSharedRegion, Slot};
use crate::signal::{NamedSignal, ResetMode};
use crate::state::{DualState, StateCodec, EMPTY_STATE, NO_PLUGIN};
use crate::transport::{self, ClientStream, LineTransport};
use std::time::Duration;

/// Sends one command per round trip and reads the reply.
pub struct CommandClient {
    transport: LineTransport<ClientStream>,
}

impl CommandClient {
    pub async fn connect(config: &BridgeConfig) -> Result<Self> {
        let transport = transport::connect(&config.pipe_name(), config.max_command_len).await?;
        Ok(Self { transport })
    }

    /// Send a raw line and parse the reply.
    pub async fn send_line(&mut self, line: &str) -> Result<Response> {
        self.transport.write_line(line).await?;
        let reply = self.transport.read_line().await?.ok_or_else(|| {
            BridgeError::ConnectionFailed("host closed the connection".to_string())
        })?;
        Response::parse(&reply)
    }

    pub async fn send(&mut self, command: &AsyncCommand) -> Result<Response> {
        self.send_line(&command.to_string()).await
    }

    /// `Ok(None)` when no plugin is loaded.
    pub async fn get_state(&mut self) -> Result<Option<DualState>> {
        match self.send_line("get_state").await? {
            Response::Ok(Some(payload)) if payload == EMPTY_STATE => Ok(Some(DualState::default())),
            Response::Ok(Some(payload)) => Ok(Some(StateCodec::new().decode(&payload)?)),
            Response::Fail(reason) if reason == NO_PLUGIN => Ok(None),
            other => Err(BridgeError::ProtocolError(format!(
                "unexpected get_state reply: {other}"
            ))),
        }
    }

    pub async fn exit(&mut self) -> Result<()> {
        match self.send_line("exit").await? {
            Response::ExitAck => Ok(()),
            other => Err(BridgeError::ProtocolError(format!(
                "unexpected exit reply: {other}"
            ))),
        }
    }
}

/// Drives one processing cycle at a time through the shared region.
pub struct AudioClient {
    region: AudioSharedRegion,
    ready: NamedSignal,
    done: NamedSignal,
}

impl AudioClient {
    pub fn open(config: &BridgeConfig) -> Result<Self> {
        Ok(Self {
            region: AudioSharedRegion::open(&config.shm_name())?,
            ready: NamedSignal::open(&config.event_ready_name(), ResetMode::Manual)?,
            done: NamedSignal::open(&config.event_done_name(), ResetMode::Auto)?,
        })
    }

    /// Write a stereo block, signal ready, wait for done, read the outputs back.
    pub fn process_block(
        &mut self,
        sample_rate: f64,
        inputs: [&[f32]; 2],
        outputs: [&mut [f32]; 2],
        timeout: Duration,
    ) -> Result<()> {
        let frames = inputs[0].len();
        if frames > MAX_BLOCK_SIZE || inputs[1].len() != frames {
            return Err(BridgeError::SharedMemoryError(format!(
                "block must be two equal channels of at most {} frames",
                MAX_BLOCK_SIZE
            )));
        }

        self.region.write_header(&AudioHeader {
            sample_rate,
            num_samples: frames as i32,
            num_channels: 2,
        });
        self.region.write_slot(Slot::InputLeft, inputs[0])?;
        self.region.write_slot(Slot::InputRight, inputs[1])?;

        self.ready.set()?;
        self.done.wait_or_timeout(timeout)?;

        let [left, right] = outputs;
        let n = frames.min(left.len());
        self.region.read_slot_into(Slot::OutputLeft, &mut left[..n]);
        let n = frames.min(right.len());
        self.region.read_slot_into(Slot::OutputRight, &mut right[..n]);
        Ok(())
    }

    /// Signal ready with an explicit header and leave the slots untouched.
    pub fn signal_raw(&mut self, header: AudioHeader, timeout: Duration) -> Result<()> {
        self.region.write_header(&header);
        self.ready.set()?;
        self.done.wait_or_timeout(timeout)
    }

    /// Whether a done signal is pending without a matching ready.
    pub fn poll_done(&self) -> Result<bool> {
        self.done.wait(Duration::ZERO)
    }
}
