use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::SigningKey;
use ethers::signers::{LocalWallet, Signer};
use ethers::utils::to_checksum;
use rand::rngs::OsRng;

use crate::models::{Currency, WalletSecret};

/// A single-use receiving wallet.
pub struct GeneratedWallet {
    pub address: String,
    pub secret: WalletSecret,
}

pub fn generate_wallet(currency: Currency) -> GeneratedWallet {
    let wallet = match currency {
        Currency::Eth => generate_eth_wallet(),
        Currency::Sol => generate_sol_wallet(),
    };
    tracing::info!("Generated new {} wallet with address: {}", currency, wallet.address);
    wallet
}

/// secp256k1 key; the secret is the 0x-prefixed hex scalar.
fn generate_eth_wallet() -> GeneratedWallet {
    let wallet = LocalWallet::new(&mut OsRng);
    let private_key = format!("0x{}", hex::encode(wallet.signer().to_bytes()));

    GeneratedWallet {
        address: to_checksum(&wallet.address(), None),
        secret: WalletSecret {
            currency: Currency::Eth,
            private_key,
        },
    }
}

/// ed25519 key; base58 public key as address, base64 64-byte keypair as secret.
fn generate_sol_wallet() -> GeneratedWallet {
    let signing_key = SigningKey::generate(&mut OsRng);

    GeneratedWallet {
        address: bs58::encode(signing_key.verifying_key().as_bytes()).into_string(),
        secret: WalletSecret {
            currency: Currency::Sol,
            private_key: BASE64.encode(signing_key.to_keypair_bytes()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Address;

    #[test]
    fn eth_secret_controls_the_address() {
        let generated = generate_wallet(Currency::Eth);
        assert!(generated.address.starts_with("0x"));
        assert_eq!(generated.address.len(), 42);

        let restored: LocalWallet = generated.secret.private_key.parse().unwrap();
        let address: Address = generated.address.parse().unwrap();
        assert_eq!(restored.address(), address);
    }

    #[test]
    fn sol_secret_controls_the_address() {
        let generated = generate_wallet(Currency::Sol);

        let keypair = BASE64.decode(&generated.secret.private_key).unwrap();
        assert_eq!(keypair.len(), 64);

        let public = bs58::decode(&generated.address).into_vec().unwrap();
        assert_eq!(public.len(), 32);
        assert_eq!(&keypair[32..], public.as_slice());

        let bytes: [u8; 64] = keypair.try_into().unwrap();
        let restored = SigningKey::from_keypair_bytes(&bytes).unwrap();
        assert_eq!(restored.verifying_key().as_bytes(), public.as_slice());
    }

    #[test]
    fn wallets_are_never_reused() {
        let a = generate_wallet(Currency::Sol);
        let b = generate_wallet(Currency::Sol);
        assert_ne!(a.address, b.address);
        assert_ne!(a.secret.private_key, b.secret.private_key);

        let c = generate_wallet(Currency::Eth);
        let d = generate_wallet(Currency::Eth);
        assert_ne!(c.address, d.address);
    }
}
