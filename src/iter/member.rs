// src/iter/member.rs

//! Ensemble members.

use std::collections::BTreeMap;

use crate::errors::{Result, WoomError};

/// One ensemble member, with optional per-member properties coming from
/// `[ensemble.iters]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: u32,
    pub nmembers: u32,
    ndigits: usize,
    pub props: BTreeMap<String, String>,
}

impl Member {
    /// String like `member07`, zero padded to the widest id of the ensemble.
    pub fn label(&self) -> String {
        format!("member{:0width$}", self.id, width = self.ndigits)
    }

    /// String like `07/12`.
    pub fn rank(&self) -> String {
        format!("{:0width$}/{}", self.id, self.nmembers, width = self.ndigits)
    }
}

/// Generate `size` members with ids `first_id..first_id + size`.
///
/// Every iterator in `iters` must provide exactly one value per member.
pub fn gen_ensemble(
    size: u32,
    first_id: u32,
    iters: &BTreeMap<String, Vec<String>>,
) -> Result<Vec<Member>> {
    if size < 1 {
        return Err(WoomError::config("ensemble size must be >= 1"));
    }
    if first_id > 1 {
        return Err(WoomError::config(format!(
            "ensemble first_id must be 0 or 1 (got {first_id})"
        )));
    }
    for (name, values) in iters {
        if values.len() != size as usize {
            return Err(WoomError::config(format!(
                "ensemble iterator '{name}' must have a length of {size}, not {}",
                values.len()
            )));
        }
    }

    let ndigits = (first_id + size - 1).max(1).to_string().len();
    let members = (0..size)
        .map(|i| Member {
            id: first_id + i,
            nmembers: size,
            ndigits,
            props: iters
                .iter()
                .map(|(name, values)| (name.clone(), values[i as usize].clone()))
                .collect(),
        })
        .collect();
    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_zero_padded() {
        let members = gen_ensemble(12, 1, &BTreeMap::new()).unwrap();
        assert_eq!(members.len(), 12);
        assert_eq!(members[0].label(), "member01");
        assert_eq!(members[11].label(), "member12");
        assert_eq!(members[6].rank(), "07/12");
    }

    #[test]
    fn zero_based_ids() {
        let members = gen_ensemble(3, 0, &BTreeMap::new()).unwrap();
        let ids: Vec<u32> = members.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn iterators_become_member_props() {
        let mut iters = BTreeMap::new();
        iters.insert("seed".to_string(), vec!["11".to_string(), "22".to_string()]);
        let members = gen_ensemble(2, 1, &iters).unwrap();
        assert_eq!(members[1].props["seed"], "22");

        iters.insert("bad".to_string(), vec!["x".to_string()]);
        assert!(matches!(
            gen_ensemble(2, 1, &iters),
            Err(WoomError::Config(msg)) if msg.contains("bad")
        ));
    }

    #[test]
    fn empty_ensemble_is_rejected() {
        assert!(gen_ensemble(0, 1, &BTreeMap::new()).is_err());
    }
}
