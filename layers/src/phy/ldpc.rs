/// LDPC transport channel processing for 5G NR PUSCH
/// Based on 3GPP TS 38.212 Sections 5.2.2, 5.3.2 and 5.4.2
///
/// Bit vectors hold one bit per element. The encoder and decoder are
/// simplified: codewords carry the systematic bits followed by a light parity
/// structure, and decoding takes a hard decision on the systematic part. The
/// segmentation and circular-buffer rate matching follow the standard.

use common::types::LogLikelihoodRatio;
use common::utils::{attach_crc, check_crc, unpack_bits, CrcPolynomial};
use tracing::debug;

/// LDPC base graph types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LdpcBaseGraph {
    /// Base graph 1 - for larger transport blocks
    BaseGraph1,
    /// Base graph 2 - for smaller transport blocks
    BaseGraph2,
}

impl LdpcBaseGraph {
    /// Systematic columns of the base graph (K_b)
    fn nof_info_columns(&self) -> usize {
        match self {
            LdpcBaseGraph::BaseGraph1 => 22,
            LdpcBaseGraph::BaseGraph2 => 10,
        }
    }

    /// Columns in the full circular buffer
    fn nof_columns(&self) -> usize {
        match self {
            LdpcBaseGraph::BaseGraph1 => 66,
            LdpcBaseGraph::BaseGraph2 => 50,
        }
    }

    /// Maximum code block size K_cb
    pub fn max_segment_size(&self) -> usize {
        match self {
            LdpcBaseGraph::BaseGraph1 => MAX_CB_SIZE_BG1,
            LdpcBaseGraph::BaseGraph2 => MAX_CB_SIZE_BG2,
        }
    }

    /// Circular buffer start position k0 for a redundancy version (Table 5.4.2.1-2)
    pub fn rv_start(&self, rv: u8, n: usize) -> usize {
        let (num, den) = match (self, rv) {
            (_, 0) => (0, 1),
            (LdpcBaseGraph::BaseGraph1, 1) => (17, 66),
            (LdpcBaseGraph::BaseGraph1, 2) => (33, 66),
            (LdpcBaseGraph::BaseGraph1, _) => (56, 66),
            (LdpcBaseGraph::BaseGraph2, 1) => (13, 50),
            (LdpcBaseGraph::BaseGraph2, 2) => (25, 50),
            (LdpcBaseGraph::BaseGraph2, _) => (43, 50),
        };
        (num * n) / den
    }
}

/// LDPC lifting size sets as per Table 5.3.2-1
const LIFTING_SIZE_SET: [usize; 51] = [
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 18, 20, 22, 24,
    26, 28, 30, 32, 36, 40, 44, 48, 52, 56, 60, 64, 72, 80, 88, 96, 104,
    112, 120, 128, 144, 160, 176, 192, 208, 224, 240, 256, 288, 320, 352, 384
];

/// Largest lifting size
pub const MAX_LIFTING_SIZE: usize = 384;

/// Maximum code block size for each base graph
const MAX_CB_SIZE_BG1: usize = 8448;
const MAX_CB_SIZE_BG2: usize = 3840;

/// Transport blocks up to this size use CRC16 and base graph 2
const SMALL_TB_THRESHOLD: usize = 3824;

/// Longest codeword: base graph 1 at the largest lifting size
pub const MAX_CODEBLOCK_SIZE: usize = 66 * MAX_LIFTING_SIZE;

/// Transport block segmentation into LDPC code blocks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdpcSegmentation {
    /// Base graph type
    pub base_graph: LdpcBaseGraph,
    /// Transport block size A in bits
    pub tbs_bits: usize,
    /// Transport block CRC
    pub tb_crc: CrcPolynomial,
    /// Number of code blocks C
    pub nof_codeblocks: usize,
    /// Transport block bits carried by each code block
    pub segment_bits: usize,
    /// Code block CRC, present when the transport block is segmented
    pub cb_crc: Option<CrcPolynomial>,
    /// Information bits per code block K, segment plus code block CRC
    pub info_bits: usize,
    /// Lifting size (Z)
    pub lifting_size: usize,
    /// Codeword length N, the circular buffer size
    pub codeblock_size: usize,
}

impl LdpcSegmentation {
    /// Segment a transport block of `tbs_bits` bits
    pub fn new(tbs_bits: usize) -> Self {
        let (tb_crc, base_graph) = if tbs_bits > SMALL_TB_THRESHOLD {
            (CrcPolynomial::Crc24A, LdpcBaseGraph::BaseGraph1)
        } else {
            (CrcPolynomial::Crc16, LdpcBaseGraph::BaseGraph2)
        };

        let b = tbs_bits + tb_crc.len();
        let k_cb = base_graph.max_segment_size();

        let (nof_codeblocks, cb_crc) = if b <= k_cb {
            (1, None)
        } else {
            let l = CrcPolynomial::Crc24B.len();
            ((b + k_cb - l - 1) / (k_cb - l), Some(CrcPolynomial::Crc24B))
        };

        let segment_bits = (b + nof_codeblocks - 1) / nof_codeblocks;
        let info_bits = segment_bits + cb_crc.map_or(0, |crc| crc.len());

        let k_b = base_graph.nof_info_columns();
        let lifting_size = LIFTING_SIZE_SET
            .iter()
            .find(|&&z| k_b * z >= info_bits)
            .copied()
            .unwrap_or(MAX_LIFTING_SIZE);

        Self {
            base_graph,
            tbs_bits,
            tb_crc,
            nof_codeblocks,
            segment_bits,
            cb_crc,
            info_bits,
            lifting_size,
            codeblock_size: base_graph.nof_columns() * lifting_size,
        }
    }

    /// CRC protecting each code block. Without segmentation the transport block CRC does.
    pub fn codeblock_crc(&self) -> CrcPolynomial {
        self.cb_crc.unwrap_or(self.tb_crc)
    }

    /// Transport block bits including its CRC (B)
    pub fn tb_bits_with_crc(&self) -> usize {
        self.tbs_bits + self.tb_crc.len()
    }

    /// Split `total_bits` rate-matched bits among the code blocks
    pub fn rate_matched_lengths(&self, total_bits: usize) -> Vec<usize> {
        let base = total_bits / self.nof_codeblocks;
        let extra = total_bits % self.nof_codeblocks;
        (0..self.nof_codeblocks)
            .map(|r| if r >= self.nof_codeblocks - extra { base + 1 } else { base })
            .collect()
    }

    /// Attach the transport block CRC, segment and attach code block CRCs.
    ///
    /// Returns the information bits of every code block, zero filled.
    pub fn segment_transport_block(&self, payload: &[u8]) -> Vec<Vec<u8>> {
        let mut bits = unpack_bits(payload);
        bits.resize(self.tbs_bits, 0);
        attach_crc(&mut bits, self.tb_crc);
        bits.resize(self.segment_bits * self.nof_codeblocks, 0);

        bits.chunks(self.segment_bits)
            .map(|segment| {
                let mut codeblock = segment.to_vec();
                if let Some(crc) = self.cb_crc {
                    attach_crc(&mut codeblock, crc);
                }
                codeblock
            })
            .collect()
    }
}

/// LDPC encoder
pub struct LdpcEncoder;

impl LdpcEncoder {
    /// Encode one code block into a codeword of `segmentation.codeblock_size` bits
    pub fn encode_codeblock(&self, info_bits: &[u8], segmentation: &LdpcSegmentation) -> Vec<u8> {
        let z = segmentation.lifting_size;
        let k_full = segmentation.base_graph.nof_info_columns() * z;
        let mut encoded = vec![0u8; segmentation.codeblock_size];

        // Systematic bits, filler up to K_b * Z stays zero
        encoded[..info_bits.len()].copy_from_slice(info_bits);

        // Simplified parity: each parity bit XORs ten spread systematic bits.
        // A real encoder uses the parity check matrix of Table 5.3.2-2/3.
        for idx in k_full..encoded.len() {
            let mut parity = 0u8;
            for j in 0..10 {
                parity ^= encoded[(idx + j * 7) % k_full];
            }
            encoded[idx] = parity;
        }

        encoded
    }
}

/// LDPC rate matcher
pub struct LdpcRateMatcher;

impl LdpcRateMatcher {
    /// Rate match LDPC encoded bits
    pub fn rate_match(&self, encoded_bits: &[u8], target_bits: usize, rv: u8, base_graph: LdpcBaseGraph) -> Vec<u8> {
        let n = encoded_bits.len();
        let start_pos = base_graph.rv_start(rv, n);

        // Circular buffer rate matching
        let output: Vec<u8> = (0..target_bits)
            .map(|i| encoded_bits[(start_pos + i) % n])
            .collect();

        debug!(
            "Rate matched {} bits to {} bits (RV={}, start={})",
            n, target_bits, rv, start_pos
        );

        output
    }
}

/// LDPC rate dematcher, the receive side of the circular buffer
pub struct LdpcRateDematcher;

impl LdpcRateDematcher {
    /// Accumulate received LLRs into the codeword soft buffer.
    ///
    /// With `new_data` the soft buffer is overwritten, otherwise the LLRs are
    /// combined with what earlier transmissions left in it.
    pub fn dematch(
        &self,
        soft_bits: &mut [LogLikelihoodRatio],
        llrs: &[LogLikelihoodRatio],
        rv: u8,
        new_data: bool,
        base_graph: LdpcBaseGraph,
    ) {
        let n = soft_bits.len();
        if new_data {
            soft_bits.fill(LogLikelihoodRatio::ZERO);
        }
        if n == 0 {
            return;
        }

        let start_pos = base_graph.rv_start(rv, n);
        for (i, &llr) in llrs.iter().enumerate() {
            let idx = (start_pos + i) % n;
            soft_bits[idx] = soft_bits[idx].combine(llr);
        }
    }
}

/// Decodes one code block from its soft buffer
pub trait CodeblockDecoder: Send + Sync {
    /// Write the information bits into `data_bits` and return whether the code block CRC passed
    fn decode(
        &self,
        soft_bits: &[LogLikelihoodRatio],
        data_bits: &mut [u8],
        segmentation: &LdpcSegmentation,
    ) -> bool;
}

/// Hard decision on the systematic part of the codeword
pub struct HardDecisionDecoder;

impl CodeblockDecoder for HardDecisionDecoder {
    fn decode(
        &self,
        soft_bits: &[LogLikelihoodRatio],
        data_bits: &mut [u8],
        segmentation: &LdpcSegmentation,
    ) -> bool {
        let k = segmentation.info_bits.min(data_bits.len()).min(soft_bits.len());
        for (bit, llr) in data_bits[..k].iter_mut().zip(soft_bits) {
            *bit = llr.hard_decision();
        }

        // Erased systematic bits cannot be recovered without parity decoding
        if soft_bits[..k].iter().any(|&llr| llr == LogLikelihoodRatio::ZERO) {
            return false;
        }

        if segmentation.cb_crc.is_some() {
            check_crc(&data_bits[..k], segmentation.codeblock_crc())
        } else {
            // Filler after B bits is not covered by the transport block CRC
            let b = segmentation.tb_bits_with_crc().min(k);
            check_crc(&data_bits[..b], segmentation.codeblock_crc())
        }
    }
}

/// Complete UL-SCH encoder, the transmit side emulated for a UE
pub struct UlschEncoder {
    encoder: LdpcEncoder,
    rate_matcher: LdpcRateMatcher,
}

impl UlschEncoder {
    pub fn new() -> Self {
        Self {
            encoder: LdpcEncoder,
            rate_matcher: LdpcRateMatcher,
        }
    }

    /// Encode a transport block into `nof_bits` rate-matched bits
    pub fn encode(&self, payload: &[u8], segmentation: &LdpcSegmentation, nof_bits: usize, rv: u8) -> Vec<u8> {
        let lengths = segmentation.rate_matched_lengths(nof_bits);

        segmentation
            .segment_transport_block(payload)
            .iter()
            .zip(lengths)
            .flat_map(|(codeblock, e)| {
                let codeword = self.encoder.encode_codeblock(codeblock, segmentation);
                self.rate_matcher.rate_match(&codeword, e, rv, segmentation.base_graph)
            })
            .collect()
    }
}

impl Default for UlschEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_tb_single_codeblock() {
        let seg = LdpcSegmentation::new(1000);
        assert_eq!(seg.base_graph, LdpcBaseGraph::BaseGraph2);
        assert_eq!(seg.tb_crc, CrcPolynomial::Crc16);
        assert_eq!(seg.nof_codeblocks, 1);
        assert_eq!(seg.cb_crc, None);
        assert_eq!(seg.segment_bits, 1016);
        assert_eq!(seg.info_bits, 1016);
        // Smallest Z with 10 * Z >= 1016
        assert_eq!(seg.lifting_size, 104);
        assert_eq!(seg.codeblock_size, 50 * 104);
    }

    #[test]
    fn test_large_tb_segmentation() {
        let seg = LdpcSegmentation::new(20000);
        assert_eq!(seg.base_graph, LdpcBaseGraph::BaseGraph1);
        assert_eq!(seg.tb_crc, CrcPolynomial::Crc24A);
        // B = 20024, C = ceil(20024 / 8424)
        assert_eq!(seg.nof_codeblocks, 3);
        assert_eq!(seg.segment_bits, 6675);
        assert_eq!(seg.info_bits, 6699);
        assert!(seg.info_bits <= 22 * seg.lifting_size);
        assert!(seg.codeblock_size <= MAX_CODEBLOCK_SIZE);
    }

    #[test]
    fn test_codeblocks_fit_data_buffer() {
        // Data bits of a codeblock slot are a third of the codeword
        for tbs in [8, 3824, 3832, 8424, 100_000, 1_277_992] {
            let seg = LdpcSegmentation::new(tbs);
            assert!(seg.info_bits <= (MAX_CODEBLOCK_SIZE + 2) / 3, "tbs {}", tbs);
            assert!(seg.codeblock_size <= MAX_CODEBLOCK_SIZE, "tbs {}", tbs);
        }
    }

    #[test]
    fn test_rate_matched_lengths() {
        let seg = LdpcSegmentation::new(20000);
        let lengths = seg.rate_matched_lengths(30001);
        assert_eq!(lengths, vec![10000, 10000, 10001]);
        assert_eq!(lengths.iter().sum::<usize>(), 30001);
    }

    #[test]
    fn test_segments_carry_crc() {
        let seg = LdpcSegmentation::new(20000);
        let payload = vec![0x5Au8; 2500];
        let codeblocks = seg.segment_transport_block(&payload);
        assert_eq!(codeblocks.len(), 3);
        for cb in &codeblocks {
            assert_eq!(cb.len(), seg.info_bits);
            assert!(check_crc(cb, CrcPolynomial::Crc24B));
        }
    }

    #[test]
    fn test_rate_match_rv_start() {
        let matcher = LdpcRateMatcher;
        let encoded: Vec<u8> = (0..66).map(|i| (i % 2) as u8).collect();
        let out = matcher.rate_match(&encoded, 10, 2, LdpcBaseGraph::BaseGraph1);
        assert_eq!(out.len(), 10);
        assert_eq!(out[0], encoded[33]);
    }

    #[test]
    fn test_dematch_combines_and_overwrites() {
        let dematcher = LdpcRateDematcher;
        let mut soft = vec![LogLikelihoodRatio::new(50); 8];
        let llrs = vec![LogLikelihoodRatio::new(10); 10];

        dematcher.dematch(&mut soft, &llrs, 0, false, LdpcBaseGraph::BaseGraph2);
        // Positions 0 and 1 are hit twice by the wrap-around
        assert_eq!(soft[0].value(), 70);
        assert_eq!(soft[2].value(), 60);

        dematcher.dematch(&mut soft, &llrs[..4], 0, true, LdpcBaseGraph::BaseGraph2);
        assert_eq!(soft[0].value(), 10);
        assert_eq!(soft[7].value(), 0);
    }

    #[test]
    fn test_encode_decode_clean_channel() {
        let seg = LdpcSegmentation::new(20000);
        let payload: Vec<u8> = (0..2500).map(|i| (i * 31 % 256) as u8).collect();
        let encoder = UlschEncoder::new();
        let bits = encoder.encode(&payload, &seg, seg.nof_codeblocks * seg.codeblock_size, 0);

        let lengths = seg.rate_matched_lengths(bits.len());
        let decoder = HardDecisionDecoder;
        let dematcher = LdpcRateDematcher;
        let mut offset = 0;
        for e in lengths {
            let llrs: Vec<_> = bits[offset..offset + e]
                .iter()
                .map(|&bit| LogLikelihoodRatio::from_bit(bit, 20))
                .collect();
            offset += e;

            let mut soft = vec![LogLikelihoodRatio::ZERO; seg.codeblock_size];
            dematcher.dematch(&mut soft, &llrs, 0, true, seg.base_graph);
            let mut data = vec![0u8; seg.info_bits];
            assert!(decoder.decode(&soft, &mut data, &seg));
        }
    }
}
