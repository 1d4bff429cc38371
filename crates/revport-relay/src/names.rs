//! Generated subdomain names

use rand::Rng;
use std::collections::HashSet;
use std::sync::Mutex;

pub const SUBDOMAIN_LEN: usize = 5;
const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Pool of generated subdomain names, collision-checked in-process.
pub struct NamePool {
    used: Mutex<HashSet<String>>,
}

impl NamePool {
    pub fn new() -> Self {
        Self {
            used: Mutex::new(HashSet::new()),
        }
    }

    /// Generate a fresh name, regenerating on collision with any name
    /// still in use.
    pub fn generate(&self) -> String {
        let mut used = self.used.lock().unwrap();
        loop {
            let name = random_name(SUBDOMAIN_LEN);
            if used.insert(name.clone()) {
                return name;
            }
        }
    }

    pub fn release(&self, name: &str) {
        self.used.lock().unwrap().remove(name);
    }
}

impl Default for NamePool {
    fn default() -> Self {
        Self::new()
    }
}

fn random_name(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}
