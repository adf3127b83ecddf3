//! Signing key fixtures.
//!
//! Each RSA key pair is stored as a PKCS#1 private key; the public modulus
//! below is the base64url encoding of the same key's `n`.

#![allow(dead_code)]

#[derive(Debug, Clone, Copy)]
pub struct RsaKeyFixture {
    pub kid: &'static str,
    pub private_pem: &'static str,
    pub modulus: &'static str,
    pub exponent: &'static str,
}

/// Published in the application's key set.
pub const PRIMARY_KEY: RsaKeyFixture = RsaKeyFixture {
    kid: "primary-2024",
    private_pem: include_str!("keys/rsa_primary.pem"),
    modulus: "mquEmpZW0JgXNC7slHMfcYDRZRwvzHOm3V9hzRBBFgYvmmBUUNxy99z-7FeC6x-DDAnanS0WDP-92uwm4OAAH0HgkN1lCvA3VtsgA1UM2dFP1MbVVhUcwmzsA5kDaUX_V4N0XIiLqmAGfyYv9PzNDGPqIJXJCNDI21bcY4ZyDTFkyTVm-RMwDOvqy-ZTc4jx0WLv_GcOmgT2LmHdq35v6HrBzJHuR6R4FWZSd1O3s57Kw3lzTyZlKMp2HAMB_4cVOD2eCC6hqVdAnvmK6hEQopBajMVqtnn-FAMVJHwj4pytSm2ZgIx0n4KF0F5PZDsVjytvHflBmpDAGnbtHxh1tw",
    exponent: "AQAB",
};

/// Published alongside the primary key during rotation.
pub const SECONDARY_KEY: RsaKeyFixture = RsaKeyFixture {
    kid: "secondary-2025",
    private_pem: include_str!("keys/rsa_secondary.pem"),
    modulus: "4mJmoJZgTu_A5yRmfCsDJnksSyHtEUE2AuIFU1zciWSjjnnsvdd3-zX1Dt8r-Jmx2fK4XIFOxWoo6sd9_KUM7Okyo2Eb05LV7Aaimf8f0D_9j_AU18ERtwmDH1jA77K2f3xCk7_8c7UyD4UlmkXl-HHpmjK5WQFI8JMu2mlLMVRq0af5MYxhhSSKRBqSPAp_3ud4JDQv24Remji0jEPoFGAg9hxF9wzmV2MuUMBSmC8Zh0N5THpWAHabNCenCAmgf7fkiqJMFELf0N9gN4TReVkIz2zE5pUMskjgpoanF06odvstChgWErG8tBdixKIQ3Y6wCKbcDmyliYzt_s0QWw",
    exponent: "AQAB",
};

/// Never published. Tokens signed with it must be rejected.
pub const UNTRUSTED_KEY: RsaKeyFixture = RsaKeyFixture {
    kid: "primary-2024",
    private_pem: include_str!("keys/rsa_untrusted.pem"),
    modulus: "x-eN9tq7zIGv7OgR_pKnWQUkW60uecdZrJpo7nkF5whk4MtaxJigrvXBa6XdwK2aKcMrtkMyV08iFUqrjtHRwPJ8pOIR6ZZc0NG6_sBG871It71HrK6eSAKca6AooAC0Oq8F__J0_MGphqln80EFE73FVMdHYD5d_nBE4V3_LGZuHakbaZDxEFdXYy8TO2T3rxGL1MaBhS1iFgxgi2EfIi2o83PuWHAMRwBoRtNX-qAuGdZjajavWkQy5ciXaikToq9QrZyMyad7pJO4Pb0NmrD6fBFmlOYWjS_MPezNv4MRFmcASiJ8SRHTIW8SRczYhFYX4LQev1zRNmR0bOKoGw",
    exponent: "AQAB",
};

pub const TEST_AUDIENCE: &str = "AAFtestapp";
pub const TEST_ADMIN_TOKEN: &str = "admin-test-token-7f3c9a";
