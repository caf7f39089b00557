// Copyright 2022-2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Components to be written in the output stream.

mod bitrepr;
mod datatype;
pub mod parser;
mod verify;

pub use bitrepr::*;
pub use datatype::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitsink::BitSink;
    use crate::bitsink::ByteSink;
    use crate::bitsource::BitSource;
    use crate::bitsource::MemSource;
    use crate::error::OutputError;

    #[test]
    fn write_minimal_stream() -> Result<(), OutputError<ByteSink>> {
        let header = StreamHeader::with_channels(1);
        let mut sink = ByteSink::new();
        header.write(&mut sink)?;
        let body_start = 8 * 5;
        Block::Zero.write(&mut sink)?;
        Block::Quit.write(&mut sink)?;
        sink.pad_to_word(body_start)
            .map_err(OutputError::<ByteSink>::from_sink)?;
        assert_eq!((sink.len() - body_start) % 32, 0);
        assert_eq!(sink.len() % 8, 0);

        let bytes = sink.into_inner();
        let mut src = MemSource::new(&bytes);
        let parsed = parser::read_stream_header(&mut src).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(
            parser::read_block(&mut src, parsed.block_size(), parsed.nwrap()).unwrap(),
            Block::Zero
        );
        assert_eq!(
            parser::read_block(&mut src, parsed.block_size(), parsed.nwrap()).unwrap(),
            Block::Quit
        );
        // the remaining bits are the padding.
        assert_eq!(src.read_unary_code().unwrap(), 0);
        Ok(())
    }

    #[test]
    fn audio_blocks_expose_residuals() {
        let residual = Residual::new(1, &[3, 4]).unwrap();
        let block = Block::fixed(2, residual.clone());
        assert!(block.is_audio());
        assert_eq!(block.fixed_order(), Some(2));
        assert_eq!(block.residual(), Some(&residual));
        assert!(!Block::BitShift(1).is_audio());
        assert!(Block::Zero.is_audio());
        assert_eq!(Block::Zero.residual(), None);
    }
}
