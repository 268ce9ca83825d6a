use super::{ContextKernel, GenerationKernel, OperationDescriptor};

/// Every workspace sub-buffer starts on this boundary.
pub const WORKSPACE_ALIGNMENT: usize = 256;

/// Smallest key/value span handled by one multi-block tile.
const MIN_SEQ_LEN_PER_TILE: usize = 256;
/// Tiles per multiprocessor the generation kernel may split a head into.
const TILES_PER_MULTIPROCESSOR: usize = 4;

const INT_BYTES: usize = size_of::<i32>();
const FLOAT_BYTES: usize = size_of::<f32>();

fn aligned_total(sizes: &[usize]) -> usize {
    sizes
        .iter()
        .map(|size| size.next_multiple_of(WORKSPACE_ALIGNMENT))
        .sum()
}

impl OperationDescriptor {
    fn element_bytes(&self) -> usize {
        self.data_type().size_in_bytes()
    }

    fn uses_fused_context(&self) -> bool {
        self.selection()
            .is_none_or(|selection| selection.context == ContextKernel::FusedMultiHead)
    }

    fn generation_kernel(&self) -> GenerationKernel {
        self.selection()
            .map_or(GenerationKernel::MaskedMultiHead, |selection| selection.generation)
    }

    fn multiprocessor_count(&self) -> usize {
        self.selection()
            .map_or(1, |selection| selection.device.multiprocessor_count.max(1))
    }

    /// Scratch bytes for a context phase of `num_tokens` packed tokens.
    pub fn context_workspace_size(
        &self,
        max_num_requests: usize,
        max_input_length: usize,
        num_tokens: usize,
    ) -> usize {
        let element = self.element_bytes();
        let batch = max_num_requests;
        let seq = max_input_length;
        let fused = self.uses_fused_context();

        let (local_hidden, kv_hidden) = match self.latent() {
            Some(latent) => {
                let context_head = latent.dims.context_head_size();
                (
                    self.num_heads() * context_head,
                    self.num_heads() * (context_head + latent.dims.v_head_dim),
                )
            },
            None => (
                self.num_heads() * self.head_size(),
                self.num_kv_heads() * self.head_size(),
            ),
        };

        let unfused = |size: usize| if fused { 0 } else { size };
        let attention_mask = unfused(element * batch * seq * seq);
        let cu_seqlens = INT_BYTES * (batch + 1);
        let rotary_inv_freq = if self.is_rotary_enabled() {
            FLOAT_BYTES * batch * self.rotary_dim() / 2
        } else {
            0
        };
        let q_buf = if !fused || self.paged_context_fmha() || self.fp8_context_fmha() {
            element * num_tokens * local_hidden
        } else {
            0
        };
        let k_buf = unfused(element * batch * seq * kv_hidden);
        let v_buf = unfused(element * batch * seq * kv_hidden);
        let qk_buf = unfused(element * batch * self.num_heads() * seq * seq);
        let qkv_buf_2 = unfused(element * num_tokens * local_hidden);
        let qk_buf_float = unfused(FLOAT_BYTES * batch * self.num_heads() * seq * seq);
        let fp8_qkv = if self.fp8_context_fmha() {
            num_tokens * (local_hidden + 2 * kv_hidden)
        } else {
            0
        };
        let padding_offset = INT_BYTES * batch * seq;
        let encoder_padding_offset = INT_BYTES * batch * seq;
        let tokens_info = 2 * INT_BYTES * num_tokens;
        let fmha_scheduler_counter = if fused { INT_BYTES } else { 0 };
        let fmha_bmm_scales = if self.fp8_context_fmha() {
            2 * FLOAT_BYTES + FLOAT_BYTES
        } else {
            0
        };

        aligned_total(&[
            attention_mask,
            cu_seqlens,
            cu_seqlens,
            cu_seqlens,
            rotary_inv_freq,
            q_buf,
            k_buf,
            v_buf,
            qk_buf,
            qkv_buf_2,
            qk_buf_float,
            fp8_qkv,
            padding_offset,
            encoder_padding_offset,
            tokens_info,
            fmha_scheduler_counter,
            fmha_bmm_scales,
        ])
    }

    /// Scratch bytes for a generation phase over `num_gen_tokens` tokens.
    pub fn generation_workspace_size(
        &self,
        max_num_requests: usize,
        max_attention_window: usize,
        num_gen_tokens: usize,
    ) -> usize {
        let element = self.element_bytes();
        let batch_beam = max_num_requests;
        let rows = batch_beam.max(num_gen_tokens);

        if let Some(latent) = self.latent() {
            let compressed_head = latent.dims.compressed_head_size();
            let cu_seqlens = INT_BYTES * (batch_beam + 1);
            let fmha_tile_counter = INT_BYTES;
            let q_buf = element * rows * self.num_heads() * compressed_head;
            let softmax_stats = 2 * FLOAT_BYTES * rows * self.num_heads();
            let tile_metadata = if self.generation_kernel() == GenerationKernel::FlashLatent {
                2 * INT_BYTES * (batch_beam + self.multiprocessor_count())
            } else {
                0
            };
            return aligned_total(&[
                cu_seqlens,
                cu_seqlens,
                fmha_tile_counter,
                q_buf,
                softmax_stats,
                tile_metadata,
            ]);
        }

        let (partial_out, partial_sum, partial_max) = if self.multi_block_mode() {
            let max_tiles = self.multiprocessor_count() * TILES_PER_MULTIPROCESSOR;
            let tiles = max_attention_window
                .div_ceil(MIN_SEQ_LEN_PER_TILE)
                .clamp(1, max_tiles);
            (
                element * rows * self.num_heads() * tiles * self.head_size(),
                FLOAT_BYTES * rows * self.num_heads() * tiles,
                FLOAT_BYTES * rows * self.num_heads() * tiles,
            )
        } else {
            (0, 0, 0)
        };
        let grouped_query_scratch =
            if self.generation_kernel() == GenerationKernel::FusedGroupedQuery {
                element * rows * self.num_heads() * self.head_size()
                    + 2 * FLOAT_BYTES * rows * self.num_heads()
            } else {
                0
            };

        aligned_total(&[partial_out, partial_sum, partial_max, grouped_query_scratch])
    }
}
