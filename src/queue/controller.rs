//! Pure derivations used by the tiered queue's paging logic (§4.3 "Controller
//! derivations"). Kept free of any disk or store access so they can be unit
//! tested directly.

use crate::message::SeqId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Msg,
    Index,
    Neither,
}

/// Storage-type selector (§4.3 Publish path). `q3_head_seq_id` must be
/// `Some` whenever `q3_empty` is false.
pub fn select_storage_type(
    target_ram_msg_count: Option<u64>,
    ram_msg_count: u64,
    q1_empty: bool,
    q3_empty: bool,
    q3_head_seq_id: Option<SeqId>,
    seq_id: SeqId,
    pqi_segment_size: u64,
) -> StorageType {
    match target_ram_msg_count {
        None => StorageType::Msg,
        Some(target) if target > ram_msg_count => StorageType::Msg,
        Some(0) => {
            if q3_empty {
                StorageType::Index
            } else {
                let s0 = q3_head_seq_id.expect("q3 non-empty implies a head seq-id");
                let boundary = (s0 / pqi_segment_size + 1) * pqi_segment_size;
                if seq_id >= boundary {
                    StorageType::Neither
                } else {
                    StorageType::Index
                }
            }
        }
        Some(_) => {
            if q1_empty {
                StorageType::Index
            } else {
                StorageType::Msg
            }
        }
    }
}

/// Permitted RAM-index count (§4.3 Controller derivations): bounds how many
/// β/γ entries may keep their index position resident only in RAM (β)
/// before `limit_ram_index` must start converting them to γ.
///
/// `len` and `delta_count` give AB = len − Δ.count (alphas+betas+gammas
/// still tracked outside Δ); `beta_plus_gamma_count` is `|q2|+|q3|`.
pub fn permitted_ram_index_count(len: u64, delta_count: u64, beta_plus_gamma_count: u64) -> Option<u64> {
    let ab = len.saturating_sub(delta_count);
    if ab == 0 {
        return None;
    }
    let beta_frac = beta_plus_gamma_count as f64 / ab as f64;
    let permitted = beta_plus_gamma_count as f64 - beta_frac * beta_plus_gamma_count as f64;
    Some(permitted.floor().max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_target_always_msg() {
        assert_eq!(
            select_storage_type(None, 0, true, true, None, 0, 16),
            StorageType::Msg
        );
    }

    #[test]
    fn target_above_ram_count_is_msg() {
        assert_eq!(
            select_storage_type(Some(10), 3, true, true, None, 3, 16),
            StorageType::Msg
        );
    }

    #[test]
    fn zero_target_first_message_is_index() {
        assert_eq!(
            select_storage_type(Some(0), 0, true, true, None, 0, 16),
            StorageType::Index
        );
    }

    #[test]
    fn zero_target_past_segment_boundary_is_neither() {
        assert_eq!(
            select_storage_type(Some(0), 0, true, false, Some(0), 16, 16),
            StorageType::Neither
        );
    }

    #[test]
    fn zero_target_before_segment_boundary_is_index() {
        assert_eq!(
            select_storage_type(Some(0), 0, true, false, Some(0), 15, 16),
            StorageType::Index
        );
    }

    #[test]
    fn nonzero_target_with_nonempty_q1_is_msg() {
        assert_eq!(
            select_storage_type(Some(5), 5, false, true, None, 5, 16),
            StorageType::Msg
        );
    }

    #[test]
    fn permitted_ram_index_zero_when_empty() {
        assert_eq!(permitted_ram_index_count(0, 0, 0), None);
    }

    // permitted = B - B^2/AB is a downward parabola in B, symmetric about
    // B = AB/2 and zero at the endpoints B=0 and B=AB — not monotonic.
    #[test]
    fn permitted_ram_index_is_symmetric_about_half_share() {
        let near_zero_share = permitted_ram_index_count(100, 0, 10).unwrap();
        let near_full_share = permitted_ram_index_count(100, 0, 90).unwrap();
        assert_eq!(near_zero_share, near_full_share);
    }

    #[test]
    fn permitted_ram_index_peaks_at_half_share() {
        let edge = permitted_ram_index_count(100, 0, 10).unwrap();
        let peak = permitted_ram_index_count(100, 0, 50).unwrap();
        assert!(peak > edge);
    }
}
