use rand::Rng;

/// URL-safe alphabet for node identifiers. No lookalike-sensitive characters
/// are excluded; collision resistance comes from length, not readability.
const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";

/// Length of a freshly minted node id.
pub const NODE_ID_LEN: usize = 10;

/// Length of the suffix a copy operation splices onto every duplicated id.
pub const COPY_SUFFIX_LEN: usize = 5;

fn random_chars(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Mint a short, URL-safe, collision-resistant node id.
pub fn new_node_id() -> String {
    random_chars(NODE_ID_LEN)
}

/// Mint the shared suffix used to remap every id in one copy pass.
pub fn new_copy_suffix() -> String {
    random_chars(COPY_SUFFIX_LEN)
}

/// Remap `id` for a copy by appending `suffix`. Appending keeps the map
/// injective: distinct source ids always yield distinct copies, whatever
/// their length or shared prefixes.
pub fn remap_id(id: &str, suffix: &str) -> String {
    format!("{id}{suffix}")
}
