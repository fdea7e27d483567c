// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Wire codec of the network transport.

use crate::endpoint::Message;
use bytes::{Buf, BufMut};
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::Status;

/// JSON codec using [serde_json](https://docs.rs/serde_json) crate, framed by gRPC.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    type Encode = Message;
    type Decode = Message;
    type Encoder = JsonEncoder;
    type Decoder = JsonDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        JsonEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        JsonDecoder
    }
}

/// Serializes one [`Message`] per frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl Encoder for JsonEncoder {
    type Item = Message;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        write_message(&item, dst)
    }
}

/// Deserializes one [`Message`] per frame. An empty frame decodes as `null`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl Decoder for JsonDecoder {
    type Item = Message;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        read_message(src).map(Some)
    }
}

fn write_message(message: &Message, dst: impl BufMut) -> Result<(), Status> {
    serde_json::to_writer(dst.writer(), message).map_err(|e| Status::internal(format!("encoding message: {e}")))
}

fn read_message(src: impl Buf) -> Result<Message, Status> {
    if !src.has_remaining() {
        return Ok(Message::Null);
    }
    serde_json::from_reader(src.reader()).map_err(|e| Status::data_loss(format!("decoding message: {e}")))
}
